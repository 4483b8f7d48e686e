//! Production `ParticipantResolver`: derives a transaction op's shard via
//! the same `Router` that handles single-document CRUD routing, replacing
//! the placeholder one-shard-per-collection mapping the coordinator's own
//! tests use.

use shardb_core::{Operation, Result, ShardId};
use shardb_routing::Router;
use shardb_txn::ParticipantResolver;
use std::sync::Arc;

pub struct RouterResolver {
    router: Arc<Router>,
}

impl RouterResolver {
    #[must_use]
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

impl ParticipantResolver for RouterResolver {
    fn resolve(&self, op: &Operation) -> Result<ShardId> {
        self.router.route_request(&op.collection, &op.document_id, None)
    }
}
