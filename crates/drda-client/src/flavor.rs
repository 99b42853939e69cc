//! Transaction flavors: how a session ends a local unit of work.
//!
//! A plain session commits with the local commit command inside a unit of
//! work. A session backed by an XA resource may only commit locally while
//! not associated with a global transaction branch, and does so outside any
//! unit-of-work chain.

use crate::agent::{ChainScope, Request};
use drda_core::{SessionConfig, XaState};
use std::fmt;

/// Strategy injected into a session for the commit/rollback wire choreography.
pub trait TransactionFlavor: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    fn commit_request(&self) -> Request;

    fn rollback_request(&self) -> Request;

    /// Chain entry point for explicit commit and rollback.
    fn chain_scope(&self) -> ChainScope;

    /// Whether local commit, rollback and auto-commit may flow in `state`.
    fn allow_local_commit_rollback(&self, state: XaState) -> bool;

    /// Whether closing the session is allowed with a unit of work open.
    fn allow_close_in_unit_of_work(&self, state: XaState, configured: bool) -> bool;

    fn is_xa(&self) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFlavor;

impl TransactionFlavor for LocalFlavor {
    fn name(&self) -> &'static str {
        "local"
    }

    fn commit_request(&self) -> Request {
        Request::Commit
    }

    fn rollback_request(&self) -> Request {
        Request::Rollback
    }

    fn chain_scope(&self) -> ChainScope {
        ChainScope::InUnitOfWork
    }

    fn allow_local_commit_rollback(&self, _state: XaState) -> bool {
        true
    }

    fn allow_close_in_unit_of_work(&self, _state: XaState, configured: bool) -> bool {
        configured
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct XaFlavor;

impl TransactionFlavor for XaFlavor {
    fn name(&self) -> &'static str {
        "xa"
    }

    fn commit_request(&self) -> Request {
        Request::XaLocalCommit
    }

    fn rollback_request(&self) -> Request {
        Request::XaLocalRollback
    }

    fn chain_scope(&self) -> ChainScope {
        ChainScope::OutsideUnitOfWork
    }

    fn allow_local_commit_rollback(&self, state: XaState) -> bool {
        state == XaState::NotAssociated
    }

    fn allow_close_in_unit_of_work(&self, state: XaState, configured: bool) -> bool {
        // The global transaction outlives the session handle.
        configured || state == XaState::Associated
    }

    fn is_xa(&self) -> bool {
        true
    }
}

/// Pick the flavor a config asks for.
pub fn flavor_for(config: &SessionConfig) -> Box<dyn TransactionFlavor> {
    if config.xa {
        Box::new(XaFlavor)
    } else {
        Box::new(LocalFlavor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_flavor() {
        let flavor = LocalFlavor;
        assert_eq!(flavor.commit_request(), Request::Commit);
        assert_eq!(flavor.chain_scope(), ChainScope::InUnitOfWork);
        assert!(flavor.allow_local_commit_rollback(XaState::Associated));
        assert!(!flavor.allow_close_in_unit_of_work(XaState::NotAssociated, false));
    }

    #[test]
    fn test_xa_flavor() {
        let flavor = flavor_for(&SessionConfig::new("db").xa(true));
        assert!(flavor.is_xa());
        assert_eq!(flavor.rollback_request(), Request::XaLocalRollback);
        assert_eq!(flavor.chain_scope(), ChainScope::OutsideUnitOfWork);
        assert!(flavor.allow_local_commit_rollback(XaState::NotAssociated));
        assert!(!flavor.allow_local_commit_rollback(XaState::Associated));
        assert!(flavor.allow_close_in_unit_of_work(XaState::Associated, false));
    }
}
