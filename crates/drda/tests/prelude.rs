//! The facade exposes enough to drive a pooled session end to end.

use drda::ScriptedAgent;
use drda::prelude::*;

#[test]
fn pooled_session_through_the_facade() {
    let agent = ScriptedAgent::new();
    let factory_agent = agent.clone();
    let pool = Pool::new(PoolConfig::new(1), move || {
        Session::open(SessionConfig::new("toursdb"), factory_agent.clone())
    });

    let session = pool.get().unwrap();
    let statement = session.create_statement().unwrap();
    let mut rs = statement.execute_query("SELECT NAME FROM CITIES").unwrap();
    assert!(rs.next().unwrap().is_none());
    drop(rs);
    drop(statement);
    session.release().unwrap();

    let stats = pool.stats();
    assert_eq!((stats.created, stats.idle_sessions), (1, 1));
    assert!(agent.flow_count() > 0);
}
