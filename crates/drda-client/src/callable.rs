//! Callable statements: stored procedure calls with OUT and INOUT parameters.

use crate::prepared::PreparedStatement;
use crate::registry::StatementId;
use crate::session::SessionCore;
use drda_core::{Error, Result, SqlType, UsageErrorKind, Value};
use std::ops::Deref;

/// Largest scale accepted when registering a decimal output.
pub const MAX_SCALE: u8 = 31;

impl SessionCore {
    pub(crate) fn register_out_parameter(
        &mut self,
        id: StatementId,
        index: usize,
        sql_type: SqlType,
        scale: u8,
    ) -> Result<()> {
        self.check_statement_open(id)?;
        if scale > MAX_SCALE {
            return Err(Error::usage(
                UsageErrorKind::InvalidArgument,
                format!("Scale {scale} is outside the range 0..={MAX_SCALE}"),
            ));
        }
        let statement = self.statement_mut(id)?;
        let Some(descriptor) = index
            .checked_sub(1)
            .and_then(|i| statement.parameters.get(i))
        else {
            return Err(Error::usage(
                UsageErrorKind::InvalidParameterIndex,
                format!("Invalid parameter index {index}"),
            ));
        };
        if !descriptor.mode.is_output() {
            return Err(Error::usage(
                UsageErrorKind::NotOutParameter,
                format!("Parameter {index} is not an OUT or INOUT parameter"),
            ));
        }
        statement.registered[index - 1] = Some((sql_type, scale));
        Ok(())
    }

    /// Output value of a registered parameter from the last call.
    pub(crate) fn out_parameter(&mut self, id: StatementId, index: usize) -> Result<Value> {
        self.check_statement_open(id)?;
        let statement = self.statement_mut(id)?;
        let registered = index
            .checked_sub(1)
            .and_then(|i| statement.registered.get(i))
            .is_some_and(Option::is_some);
        if !registered {
            return Err(Error::usage(
                UsageErrorKind::NotOutParameter,
                format!("Parameter {index} was not registered as an output parameter"),
            ));
        }
        let value = statement
            .outputs
            .get(index - 1)
            .cloned()
            .unwrap_or(Value::Null);
        statement.was_null = Some(value.is_null());
        Ok(value)
    }

    pub(crate) fn was_null(&mut self, id: StatementId) -> Result<bool> {
        self.check_statement_open(id)?;
        self.statement(id)?.was_null.ok_or_else(|| {
            Error::usage(
                UsageErrorKind::WasNullUnset,
                "was_null called before any output parameter was read",
            )
        })
    }
}

/// A prepared `CALL` with output parameters.
#[derive(Debug)]
pub struct CallableStatement {
    inner: PreparedStatement,
}

impl Deref for CallableStatement {
    type Target = PreparedStatement;

    fn deref(&self) -> &PreparedStatement {
        &self.inner
    }
}

impl CallableStatement {
    pub(crate) fn new(inner: PreparedStatement) -> Self {
        Self { inner }
    }

    /// Register the 1-based parameter `index` as an output of `sql_type`.
    pub fn register_out_parameter(&self, index: usize, sql_type: SqlType) -> Result<()> {
        self.register_out_parameter_with_scale(index, sql_type, 0)
    }

    pub fn register_out_parameter_with_scale(
        &self,
        index: usize,
        sql_type: SqlType,
        scale: u8,
    ) -> Result<()> {
        self.session
            .lock()?
            .register_out_parameter(self.id(), index, sql_type, scale)
    }

    /// Output value of parameter `index` from the last execution.
    pub fn get(&self, index: usize) -> Result<Value> {
        self.session.lock()?.out_parameter(self.id(), index)
    }

    pub fn get_as<T>(&self, index: usize) -> Result<Option<T>>
    where
        T: TryFrom<Value, Error = Error>,
    {
        match self.get(index)? {
            Value::Null => Ok(None),
            value => T::try_from(value).map(Some),
        }
    }

    /// Whether the last value read with [`get`](Self::get) was SQL NULL.
    pub fn was_null(&self) -> Result<bool> {
        self.session.lock()?.was_null(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{CallReply, ParameterDescriptor, Reply, RequestKind};
    use crate::scripted::ScriptedAgent;
    use crate::session::Session;
    use drda_core::{ParameterMode, SessionConfig};

    fn callable(wire: &ScriptedAgent) -> (Session, CallableStatement) {
        let session = Session::open(SessionConfig::new("db"), wire.clone()).unwrap();
        wire.push_reply(
            RequestKind::Prepare,
            Reply::described(
                vec![
                    ParameterDescriptor::input(SqlType::Integer),
                    ParameterDescriptor::new(SqlType::Integer, ParameterMode::InOut),
                    ParameterDescriptor::new(SqlType::VarChar, ParameterMode::Out),
                ],
                Vec::new(),
            ),
        );
        let cs = session.prepare_call("CALL P(?, ?, ?)").unwrap();
        (session, cs)
    }

    #[test]
    fn test_register_rules() {
        let wire = ScriptedAgent::new();
        let (_session, cs) = callable(&wire);
        assert_eq!(
            cs.register_out_parameter(1, SqlType::Integer)
                .unwrap_err()
                .usage_kind(),
            Some(UsageErrorKind::NotOutParameter)
        );
        assert!(cs.register_out_parameter_with_scale(2, SqlType::Decimal, 32).is_err());
        cs.register_out_parameter(2, SqlType::Integer).unwrap();
        cs.register_out_parameter(3, SqlType::VarChar).unwrap();
        assert_eq!(
            cs.was_null().unwrap_err().usage_kind(),
            Some(UsageErrorKind::WasNullUnset)
        );
    }

    #[test]
    fn test_inout_must_still_be_set() {
        let wire = ScriptedAgent::new();
        let (_session, cs) = callable(&wire);
        cs.register_out_parameter(2, SqlType::Integer).unwrap();
        cs.register_out_parameter(3, SqlType::VarChar).unwrap();
        cs.set(1, 5).unwrap();
        assert_eq!(
            cs.execute().unwrap_err().usage_kind(),
            Some(UsageErrorKind::MissingParameter)
        );
        cs.set(2, 6).unwrap();

        wire.push_reply(
            RequestKind::ExecuteCall,
            Reply::call(CallReply {
                update_count: 0,
                result_sets: Vec::new(),
                outputs: vec![Value::Null, Value::Int(11), Value::Null],
            }),
        );
        assert!(!cs.execute().unwrap());
        assert_eq!(cs.get_as::<i32>(2).unwrap(), Some(11));
        assert!(!cs.was_null().unwrap());
        assert_eq!(cs.get(3).unwrap(), Value::Null);
        assert!(cs.was_null().unwrap());
        assert!(cs.get(1).is_err());
    }
}
