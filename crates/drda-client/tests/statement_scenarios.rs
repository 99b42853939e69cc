//! Statement, cursor and procedure-call choreography through a scripted channel.

use drda_client::{
    CallReply, ColumnDescriptor, MoreResults, QueryReply, Reply, RequestKind, ScriptedAgent,
    Session,
};
use drda_core::{SessionConfig, SqlType, UsageErrorKind, Value};

fn open() -> (Session, ScriptedAgent) {
    let wire = ScriptedAgent::new();
    let session = Session::open(SessionConfig::new("toursdb"), wire.clone()).unwrap();
    wire.clear_history();
    (session, wire)
}

fn ints(name: &str, values: &[i32]) -> QueryReply {
    QueryReply::new(
        vec![ColumnDescriptor::new(name, SqlType::Integer)],
        values.iter().map(|v| vec![Value::Int(*v)]).collect(),
    )
}

#[test]
fn cursor_name_is_exclusive_while_open() {
    let (session, wire) = open();
    let first = session.create_statement().unwrap();
    first.set_cursor_name("C1").unwrap();
    wire.push_reply(RequestKind::OpenQuery, Reply::query(ints("A", &[1]).partial()));
    let rs = first.execute_query("SELECT A FROM T").unwrap();
    assert_eq!(rs.cursor_name().unwrap().as_deref(), Some("C1"));

    let second = session.create_statement().unwrap();
    second.set_cursor_name("C1").unwrap();
    let err = second.execute_query("SELECT B FROM U").unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::DuplicateCursorName));

    rs.close().unwrap();
    assert!(second.execute_query("SELECT B FROM U").is_ok());
}

#[test]
fn positioned_update_targets_server_cursor() {
    let (session, wire) = open();
    session.set_auto_commit(false).unwrap();
    let query = session.create_statement().unwrap();
    query.set_cursor_name("C1").unwrap();
    wire.push_reply(RequestKind::OpenQuery, Reply::query(ints("A", &[1, 2]).partial()));
    let mut rs = query.execute_query("SELECT A FROM T FOR UPDATE").unwrap();
    assert!(rs.next().unwrap().is_some());

    wire.clear_history();
    wire.push_reply(RequestKind::ExecuteImmediate, Reply::update_count(1));
    let update = session.create_statement().unwrap();
    assert_eq!(
        update
            .execute_update("UPDATE T SET A = 0 WHERE CURRENT OF C1")
            .unwrap(),
        1
    );
    let sent = wire
        .requests()
        .into_iter()
        .find(|r| r.kind() == RequestKind::ExecuteImmediate)
        .unwrap();
    assert!(
        sent.sql()
            .unwrap()
            .starts_with("UPDATE T SET A = 0 WHERE CURRENT OF SQL_CUR")
    );
    assert_eq!(wire.count(RequestKind::Commit), 0);
}

#[test]
fn positioned_update_on_unknown_cursor_fails() {
    let (session, wire) = open();
    session.set_auto_commit(false).unwrap();
    let err = session
        .create_statement()
        .unwrap()
        .execute_update("DELETE FROM T WHERE CURRENT OF NOPE")
        .unwrap_err();
    assert_eq!(err.usage_kind(), Some(UsageErrorKind::CursorNotFound));
    assert_eq!(wire.count(RequestKind::ExecuteImmediate), 0);
}

#[test]
fn call_returns_result_sets_in_order() {
    let (session, wire) = open();
    let call = session.prepare_call("CALL REPORT()").unwrap();
    wire.push_reply(
        RequestKind::ExecuteCall,
        Reply::call(CallReply {
            update_count: 0,
            result_sets: vec![ints("A", &[1]), ints("B", &[7, 8])],
            outputs: Vec::new(),
        }),
    );
    assert!(call.execute().unwrap());

    let mut first = call.result_set().unwrap().unwrap();
    let row = first.next().unwrap().unwrap();
    assert_eq!(row.get_as::<i32>(0).unwrap(), 1);

    assert!(call.more_results(MoreResults::CloseCurrent).unwrap());
    assert!(first.is_closed());
    let mut second = call.result_set().unwrap().unwrap();
    assert_eq!(second.fetch_all().unwrap().len(), 2);

    assert!(!call.more_results(MoreResults::CloseCurrent).unwrap());
    assert!(call.result_set().unwrap().is_none());
    assert_eq!(call.update_count().unwrap(), -1);
}
