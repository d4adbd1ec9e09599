use std::error::Error as StdError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error("MCP server returned HTTP {status} for '{method}': {body}")]
    Http {
        status: u16,
        method: String,
        body: String,
    },
    #[error("MCP error on '{method}': code={code} message={message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
    #[error("MCP client for '{server}' is closed")]
    Closed { server: String },
    #[error("{message}")]
    Message { message: String },
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// `.context()` for fallible results and missing values.
///
/// Errors keep their source under [`Error::External`]; a `None` becomes a
/// plain [`Error::Message`].
pub trait Context<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::external(context, source))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| Error::external(f(), source))
    }
}

impl<T> Context<T> for Option<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| Error::message(context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::message(f()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_context_keeps_the_source() {
        let parsed: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err = parsed.context("reading tools/list").unwrap_err();
        assert!(err.to_string().starts_with("reading tools/list: "));
        assert!(err.source().is_some());
    }

    #[test]
    fn missing_value_becomes_a_message() {
        let err = None::<u8>
            .with_context(|| "tools/call returned no result")
            .unwrap_err();
        assert!(
            matches!(err, Error::Message { message } if message == "tools/call returned no result")
        );
    }
}
