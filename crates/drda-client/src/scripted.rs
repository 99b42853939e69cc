//! An in-memory [`Agent`] that records every chain and replays scripted replies.
//!
//! Replies are queued per [`RequestKind`] and handed out in the order the
//! matching requests are read. A request with nothing queued gets a neutral
//! default: a describe counting `?` markers, an empty cursor, an update
//! count of zero, or a bare acknowledgement.
//!
//! Clones share state, so a test keeps one clone to inspect after handing
//! the other to a session.

use crate::agent::{
    Agent, CallReply, ChainScope, ParameterDescriptor, QueryReply, Reply, ReplyBody, Request,
    RequestKind,
};
use drda_core::{Error, ProtocolErrorKind, Result, SqlType};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One flowed write chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub scope: ChainScope,
    pub requests: Vec<Request>,
}

impl Chain {
    pub fn kinds(&self) -> Vec<RequestKind> {
        self.requests.iter().map(Request::kind).collect()
    }
}

#[derive(Debug, Default)]
struct Script {
    replies: HashMap<RequestKind, VecDeque<Result<Reply>>>,
    rejected: HashMap<RequestKind, VecDeque<Error>>,
    writing: Option<Chain>,
    chains: Vec<Chain>,
    awaiting: VecDeque<Request>,
    deferred: Vec<Error>,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
    script: Arc<Mutex<Script>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the reply for the next request of `kind`.
    pub fn push_reply(&self, kind: RequestKind, reply: Reply) -> &Self {
        self.script()
            .replies
            .entry(kind)
            .or_default()
            .push_back(Ok(reply));
        self
    }

    /// Make the next read of a `kind` reply fail with `error`.
    pub fn push_error(&self, kind: RequestKind, error: Error) -> &Self {
        self.script()
            .replies
            .entry(kind)
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Make the next read of a `kind` reply break the chain.
    pub fn break_chain_at(&self, kind: RequestKind) -> &Self {
        self.push_error(
            kind,
            Error::protocol(ProtocolErrorKind::ChainBreaking, "reply stream broken"),
        )
    }

    /// Make the next write of a `kind` request fail with `error`. The request
    /// still goes out, so its reply keeps its place in the chain.
    pub fn reject_write(&self, kind: RequestKind, error: Error) -> &Self {
        self.script()
            .rejected
            .entry(kind)
            .or_default()
            .push_back(error);
        self
    }

    /// Queue an error surfaced by the next deferred-exception check.
    pub fn defer_error(&self, error: Error) {
        self.script().deferred.push(error);
    }

    /// Every chain flowed so far, oldest first.
    pub fn chains(&self) -> Vec<Chain> {
        self.script().chains.clone()
    }

    pub fn last_chain(&self) -> Option<Chain> {
        self.script().chains.last().cloned()
    }

    pub fn flow_count(&self) -> usize {
        self.script().chains.len()
    }

    /// All flowed requests in write order.
    pub fn requests(&self) -> Vec<Request> {
        self.script()
            .chains
            .iter()
            .flat_map(|c| c.requests.iter().cloned())
            .collect()
    }

    /// Number of flowed requests of `kind`.
    pub fn count(&self, kind: RequestKind) -> usize {
        self.script()
            .chains
            .iter()
            .flat_map(|c| c.requests.iter())
            .filter(|r| r.kind() == kind)
            .count()
    }

    /// Forget recorded chains; queued replies stay.
    pub fn clear_history(&self) {
        self.script().chains.clear();
    }

    /// Scripted replies not consumed yet.
    pub fn unused_replies(&self) -> usize {
        self.script().replies.values().map(VecDeque::len).sum()
    }
}

fn count_parameter_markers(sql: &str) -> usize {
    let mut count = 0;
    let mut quote = None;
    for c in sql.chars() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '?') => count += 1,
            _ => {}
        }
    }
    count
}

fn default_reply(request: &Request) -> Reply {
    match request {
        Request::Prepare {
            sql,
            describe_input,
            ..
        } => {
            let markers = if *describe_input {
                count_parameter_markers(sql)
            } else {
                0
            };
            Reply::described(
                vec![ParameterDescriptor::input(SqlType::VarChar); markers],
                Vec::new(),
            )
        }
        Request::OpenQuery { .. } => Reply::query(QueryReply::empty()),
        Request::Execute { .. } | Request::ExecuteImmediate { .. } => Reply::update_count(0),
        Request::ExecuteCall { .. } => Reply::call(CallReply::default()),
        Request::Fetch { .. } => Reply::new(ReplyBody::Rows {
            rows: Vec::new(),
            end_of_data: true,
        }),
        _ => Reply::ack(),
    }
}

fn closed_channel() -> Error {
    Error::protocol(ProtocolErrorKind::Disconnect, "channel is closed")
}

impl Agent for ScriptedAgent {
    fn begin_write_chain(&mut self, scope: ChainScope) -> Result<()> {
        let mut script = self.script();
        if script.closed {
            return Err(closed_channel());
        }
        script.writing = Some(Chain {
            scope,
            requests: Vec::new(),
        });
        Ok(())
    }

    fn write(&mut self, request: Request) -> Result<()> {
        let mut script = self.script();
        let rejection = script
            .rejected
            .get_mut(&request.kind())
            .and_then(VecDeque::pop_front);
        match script.writing.as_mut() {
            Some(chain) => {
                chain.requests.push(request);
                rejection.map_or(Ok(()), Err)
            }
            None => Err(Error::protocol(
                ProtocolErrorKind::UnexpectedReply,
                "request written outside a chain",
            )),
        }
    }

    fn flow(&mut self, scope: ChainScope) -> Result<()> {
        let mut script = self.script();
        if script.closed {
            return Err(closed_channel());
        }
        let Some(mut chain) = script.writing.take() else {
            return Err(Error::protocol(
                ProtocolErrorKind::UnexpectedReply,
                "flow without a chain",
            ));
        };
        chain.scope = scope;
        script.awaiting.extend(chain.requests.iter().cloned());
        script.chains.push(chain);
        Ok(())
    }

    fn read(&mut self) -> Result<Reply> {
        let mut script = self.script();
        let Some(request) = script.awaiting.pop_front() else {
            return Err(Error::protocol(
                ProtocolErrorKind::UnexpectedReply,
                "no reply pending",
            ));
        };
        let scripted = script
            .replies
            .get_mut(&request.kind())
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(err)) => {
                if err.is_chain_breaking() {
                    script.awaiting.clear();
                }
                if matches!(&err, Error::Protocol(p) if p.kind == ProtocolErrorKind::Disconnect) {
                    script.closed = true;
                }
                Err(err)
            }
            None => Ok(default_reply(&request)),
        }
    }

    fn end_read_chain(&mut self) -> Result<()> {
        self.script().awaiting.clear();
        Ok(())
    }

    fn check_for_deferred_exceptions(&mut self) -> Result<()> {
        let mut script = self.script();
        if script.deferred.is_empty() {
            Ok(())
        } else {
            Err(script.deferred.remove(0))
        }
    }

    fn close(&mut self) -> Result<()> {
        let mut script = self.script();
        script.closed = true;
        script.awaiting.clear();
        script.writing = None;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.script().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionManager;
    use drda_core::Holdability;

    #[test]
    fn test_records_chains_and_replays_in_order() {
        let wire = ScriptedAgent::new();
        let mut agent = wire.clone();
        wire.push_reply(RequestKind::Execute, Reply::update_count(3));

        let section = SectionManager::new()
            .get_dynamic_section(Holdability::HoldCursorsOverCommit)
            .unwrap();
        agent.begin_write_chain(ChainScope::InUnitOfWork).unwrap();
        agent
            .write(Request::Execute {
                section,
                parameters: Vec::new(),
                types: Vec::new(),
            })
            .unwrap();
        agent.write(Request::Commit).unwrap();
        agent.flow(ChainScope::InUnitOfWork).unwrap();

        assert_eq!(agent.read().unwrap(), Reply::update_count(3));
        assert_eq!(agent.read().unwrap(), Reply::ack());
        assert!(agent.read().is_err());
        agent.end_read_chain().unwrap();

        assert_eq!(wire.flow_count(), 1);
        assert_eq!(
            wire.last_chain().unwrap().kinds(),
            vec![RequestKind::Execute, RequestKind::Commit]
        );
        assert_eq!(wire.unused_replies(), 0);
    }

    #[test]
    fn test_default_describe_counts_markers() {
        assert_eq!(count_parameter_markers("insert into t values (?, '?', ?)"), 2);
        assert_eq!(count_parameter_markers(r#"select "a?" from t"#), 0);
    }

    #[test]
    fn test_deferred_and_closed() {
        let mut agent = ScriptedAgent::new();
        agent.defer_error(Error::Custom("late".into()));
        assert!(agent.check_for_deferred_exceptions().is_err());
        assert!(agent.check_for_deferred_exceptions().is_ok());

        agent.close().unwrap();
        assert!(agent.is_closed());
        assert!(agent.begin_write_chain(ChainScope::OutsideUnitOfWork).is_err());
    }
}
