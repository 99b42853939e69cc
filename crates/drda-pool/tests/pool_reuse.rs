//! Pooled reuse driven end to end through a scripted channel.

use drda_client::{RequestKind, ScriptedAgent, Session};
use drda_core::SessionConfig;
use drda_pool::{Pool, PoolConfig};

fn pool(config: PoolConfig) -> (Pool, ScriptedAgent) {
    let wire = ScriptedAgent::new();
    let agent = wire.clone();
    let pool = Pool::new(config, move || {
        Session::open(SessionConfig::new("toursdb"), agent.clone())
    });
    (pool, wire)
}

#[test]
fn open_unit_of_work_is_rolled_back_on_return() {
    let (pool, wire) = pool(PoolConfig::default());
    {
        let session = pool.get().unwrap();
        session.set_auto_commit(false).unwrap();
        let statement = session.create_statement().unwrap();
        statement.execute_update("UPDATE T SET A = 1").unwrap();
        assert!(session.in_unit_of_work().unwrap());
    }
    assert_eq!(wire.count(RequestKind::Rollback), 1);
    assert_eq!(pool.stats().idle_sessions, 1);

    let session = pool.get().unwrap();
    assert!(session.auto_commit().unwrap());
    assert!(!session.in_unit_of_work().unwrap());
}

#[test]
fn release_reports_unusable_session() {
    let (pool, wire) = pool(PoolConfig::default().rollback_on_return(false));
    let session = pool.get().unwrap();
    let held = Session::clone(&session);
    session.set_auto_commit(false).unwrap();
    session
        .create_statement()
        .unwrap()
        .execute_update("DELETE FROM T")
        .unwrap();
    assert!(session.release().is_err());
    let stats = pool.stats();
    assert_eq!(stats.idle_sessions, 0);
    assert_eq!(stats.discarded, 1);
    assert!(held.is_physically_closed());
    assert_eq!(wire.count(RequestKind::Rollback), 1);
}

#[test]
fn pooled_statements_are_reprepared_on_full_reset() {
    let (pool, wire) = pool(PoolConfig::default().statement_pooling(true));
    let session = pool.get().unwrap();
    let ps = session.prepare_statement("SELECT * FROM T WHERE ID = ?").unwrap();
    drop(session);
    assert_eq!(wire.count(RequestKind::Prepare), 1);

    let _session = pool.get().unwrap();
    assert_eq!(wire.count(RequestKind::Prepare), 2);
    assert!(!ps.is_closed());
    assert_eq!(ps.parameter_count().unwrap(), 1);
}

#[test]
fn light_reset_keeps_statements_as_they_were() {
    let config = PoolConfig::default()
        .statement_pooling(true)
        .full_reset_on_checkout(false);
    let (pool, wire) = pool(config);
    let session = pool.get().unwrap();
    let ps = session.prepare_statement("VALUES 1").unwrap();
    drop(session);

    let _session = pool.get().unwrap();
    assert_eq!(wire.count(RequestKind::Prepare), 1);
    assert!(!ps.is_closed());
}

#[test]
fn statements_close_without_statement_pooling() {
    let (pool, _wire) = pool(PoolConfig::default());
    let session = pool.get().unwrap();
    let ps = session.prepare_statement("VALUES 1").unwrap();
    drop(session);
    assert!(ps.is_closed());
}
