//! Session-level choreography driven through a scripted channel.

use drda_client::{
    ColumnDescriptor, QueryReply, Reply, RequestKind, ScriptedAgent, Session,
};
use drda_core::{Error, Holdability, IsolationLevel, SessionConfig, SqlType, Value, XaState};

fn open(config: SessionConfig) -> (Session, ScriptedAgent) {
    let wire = ScriptedAgent::new();
    let session = Session::open(config, wire.clone()).unwrap();
    wire.clear_history();
    (session, wire)
}

#[test]
fn prepared_insert_commits_in_the_same_chain() {
    let (session, wire) = open(SessionConfig::new("toursdb"));
    let insert = session.prepare_statement("INSERT INTO T VALUES (?)").unwrap();
    insert.set(1, 42).unwrap();
    wire.clear_history();

    wire.push_reply(RequestKind::Execute, Reply::update_count(1));
    let before = session.transaction_id().unwrap();
    assert!(!insert.execute().unwrap());

    assert_eq!(wire.flow_count(), 1);
    assert_eq!(
        wire.last_chain().unwrap().kinds(),
        vec![RequestKind::Execute, RequestKind::Commit]
    );
    assert_eq!(insert.update_count().unwrap(), 1);
    assert!(!session.in_unit_of_work().unwrap());
    assert_eq!(session.transaction_id().unwrap(), before + 1);
}

#[test]
fn write_error_substitutes_the_auto_commit() {
    let (session, wire) = open(SessionConfig::new("toursdb"));
    let insert = session.prepare_statement("INSERT INTO T VALUES (?)").unwrap();
    insert.set(1, "too long").unwrap();
    wire.clear_history();
    wire.reject_write(
        RequestKind::Execute,
        Error::server(-302, "22001", "value too long"),
    );

    let before = session.transaction_id().unwrap();
    let err = insert.execute().unwrap_err();
    assert_eq!(err.sqlstate(), Some("22001"));
    assert_eq!(
        wire.last_chain().unwrap().kinds(),
        vec![RequestKind::Execute, RequestKind::CommitSubstitute]
    );
    assert_eq!(wire.count(RequestKind::Commit), 0);
    assert!(session.in_unit_of_work().unwrap());
    assert_eq!(session.transaction_id().unwrap(), before);
}

#[test]
fn manual_delete_then_rollback() {
    let (session, wire) = open(SessionConfig::new("toursdb"));
    session.set_auto_commit(false).unwrap();
    let lookup = session.prepare_statement("SELECT A FROM T WHERE B = ?").unwrap();
    let statement = session.create_statement().unwrap();
    wire.push_reply(RequestKind::ExecuteImmediate, Reply::update_count(3));
    assert_eq!(
        statement
            .execute_update("DELETE FROM T WHERE A > 10")
            .unwrap(),
        3
    );
    assert!(session.in_unit_of_work().unwrap());
    assert!(session.lock().unwrap().listener_count() > 0);

    session.rollback().unwrap();
    assert!(!session.in_unit_of_work().unwrap());
    assert_eq!(session.lock().unwrap().listener_count(), 0);
    assert!(!lookup.is_closed());
    assert_eq!(wire.count(RequestKind::Commit), 0);
    assert_eq!(wire.count(RequestKind::Rollback), 1);
}

#[test]
fn transaction_id_moves_only_on_completion() {
    let (session, _wire) = open(SessionConfig::new("toursdb"));
    session.set_auto_commit(false).unwrap();
    let start = session.transaction_id().unwrap();

    session.commit().unwrap();
    assert_eq!(session.transaction_id().unwrap(), start);

    session
        .create_statement()
        .unwrap()
        .execute_update("UPDATE T SET A = 1")
        .unwrap();
    session.commit().unwrap();
    assert_eq!(session.transaction_id().unwrap(), start + 1);

    session.rollback().unwrap();
    assert_eq!(session.transaction_id().unwrap(), start + 2);
}

#[test]
fn isolation_is_cached_until_xa_association_changes() {
    let (session, wire) = open(SessionConfig::new("toursdb"));
    session
        .complete_initial_piggyback_isolation(IsolationLevel::ReadCommitted)
        .unwrap();
    assert_eq!(session.isolation().unwrap(), IsolationLevel::ReadCommitted);
    assert_eq!(wire.flow_count(), 0);

    session.set_isolation(IsolationLevel::Serializable).unwrap();
    let flows = wire.flow_count();
    assert!(
        wire
            .requests()
            .iter()
            .any(|r| r.sql() == Some("SET CURRENT ISOLATION = RR"))
    );
    assert_eq!(session.isolation().unwrap(), IsolationLevel::Serializable);
    assert_eq!(wire.flow_count(), flows);

    // Same level again: nothing to flow.
    session.set_isolation(IsolationLevel::Serializable).unwrap();
    assert_eq!(wire.flow_count(), flows);

    session.set_xa_state(XaState::Associated).unwrap();
    wire.push_reply(
        RequestKind::OpenQuery,
        Reply::query(QueryReply::new(
            vec![ColumnDescriptor::new("1", SqlType::Char)],
            vec![vec![Value::Text("RS".to_string())]],
        )),
    );
    assert_eq!(session.isolation().unwrap(), IsolationLevel::RepeatableRead);
    assert!(wire.flow_count() > flows);
}

#[test]
fn close_refused_with_open_unit_of_work() {
    let (session, wire) = open(SessionConfig::new("toursdb"));
    session.set_auto_commit(false).unwrap();
    session
        .create_statement()
        .unwrap()
        .execute_update("INSERT INTO T VALUES (1)")
        .unwrap();

    let err = session.close().unwrap_err();
    assert_eq!(err.sqlstate(), Some("25001"));
    assert!(!session.is_closed());

    session.commit().unwrap();
    session.close().unwrap();
    assert!(session.is_physically_closed());
    assert_eq!(wire.count(RequestKind::Commit), 1);
}

#[test]
fn close_refused_with_open_cursor_under_auto_commit() {
    let (session, wire) = open(SessionConfig::new("toursdb"));
    assert!(session.auto_commit().unwrap());
    wire.push_reply(
        RequestKind::OpenQuery,
        Reply::query(
            QueryReply::new(
                vec![ColumnDescriptor::new("A", SqlType::Integer)],
                vec![vec![Value::Int(1)], vec![Value::Int(2)]],
            )
            .partial(),
        ),
    );
    let statement = session.create_statement().unwrap();
    let rs = statement.execute_query("SELECT A FROM T").unwrap();
    assert!(session.in_unit_of_work().unwrap());

    let err = session.close().unwrap_err();
    assert_eq!(err.sqlstate(), Some("25001"));
    assert!(!session.is_closed());

    rs.close().unwrap();
    assert!(!session.in_unit_of_work().unwrap());
    session.close().unwrap();
    assert!(session.is_physically_closed());
}

#[test]
fn close_for_reuse_then_reset() {
    let (session, _wire) = open(SessionConfig::new("toursdb"));
    session.set_auto_commit(false).unwrap();
    let ps = session.prepare_statement("VALUES 1").unwrap();

    session.close_for_reuse(true).unwrap();
    assert!(session.is_closed());
    assert!(!session.is_physically_closed());
    assert!(!ps.is_closed());

    session.reset(false, false).unwrap();
    assert!(!session.is_closed());
    assert!(session.auto_commit().unwrap());
    assert!(!ps.is_closed());
}

#[test]
fn schema_is_cached_after_set() {
    let (session, wire) = open(SessionConfig::new("toursdb"));
    session.set_schema("SALES").unwrap();
    assert!(
        wire
            .requests()
            .iter()
            .any(|r| r.sql() == Some("SET SCHEMA ?"))
    );
    let flows = wire.flow_count();
    assert_eq!(session.current_schema().unwrap().as_deref(), Some("SALES"));
    session.set_schema("SALES").unwrap();
    assert_eq!(wire.flow_count(), flows);
}

#[test]
fn xa_hold_downgrade_on_new_statements() {
    let (session, _wire) = open(SessionConfig::new("toursdb").xa(true));
    session.set_xa_state(XaState::Associated).unwrap();
    let statement = session.create_statement().unwrap();
    assert_eq!(
        statement.holdability().unwrap(),
        Holdability::CloseCursorsAtCommit
    );
    assert!(
        session
            .warnings()
            .unwrap()
            .iter()
            .any(|w| w.sqlstate == "01J07")
    );
}
