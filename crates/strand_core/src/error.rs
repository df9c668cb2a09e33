use boa_engine::{Context, JsError, JsNativeError, JsString, JsValue};
use derive_more::{Display, Error, From};

#[derive(Display, Debug, Error, From)]
pub enum Error {
    JsError {
        source: JsError,
    },
    IoError {
        source: std::io::Error,
    },
    RuntimeError {
        description: String,
    },
}

impl From<Error> for JsError {
    fn from(value: Error) -> Self {
        match value {
            Error::JsError { source } => source,
            Error::IoError { source } => JsNativeError::error()
                .with_message(format!("IoError: {}", source))
                .into(),
            Error::RuntimeError { description } => JsNativeError::error()
                .with_message(format!("RuntimeError: {description}"))
                .into(),
        }
    }
}

impl From<boa_engine::JsNativeError> for Error {
    fn from(source: boa_engine::JsNativeError) -> Self {
        Error::JsError {
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Builds an error whose `name` property is redefined, for the
/// DOMException-shaped errors (`AbortError`, `InvalidStateError`,
/// `EncodingError`, ...) that have no `JsNativeError` variant.
pub fn named_error(name: &str, message: &str, context: &mut Context) -> JsError {
    let error =
        JsError::from_native(JsNativeError::error().with_message(message.to_string()));
    let value = error.to_opaque(context);
    if let Some(obj) = value.as_object() {
        let _ = obj.set(
            JsString::from("name"),
            JsValue::from(JsString::from(name)),
            false,
            context,
        );
    }
    JsError::from_opaque(value)
}

/// The error every aborted operation settles with when the signal carries no
/// explicit reason.
pub fn abort_error(message: &str, context: &mut Context) -> JsError {
    named_error("AbortError", message, context)
}

#[cfg(test)]
mod test {
    use super::*;
    use boa_engine::Context;

    #[test]
    fn named_error_redefines_name() {
        let mut context = Context::default();
        let err = named_error("AbortError", "aborted", &mut context);
        let value = err.to_opaque(&mut context);
        let obj = value.as_object().unwrap();
        let name = obj.get(JsString::from("name"), &mut context).unwrap();
        assert_eq!(
            name.as_string().unwrap().to_std_string_escaped(),
            "AbortError"
        );
        let message = obj.get(JsString::from("message"), &mut context).unwrap();
        assert_eq!(
            message.as_string().unwrap().to_std_string_escaped(),
            "aborted"
        );
    }
}
