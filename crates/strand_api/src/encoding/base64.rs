//! The `btoa` / `atob` globals: RFC 4648 base64 over byte strings.
//!
//! `btoa` accepts only code points up to U+00FF (the Latin1 range) and
//! produces canonical, padded base64. `atob` strips ASCII whitespace, insists
//! on the strict alphabet and a valid length, and yields a byte string.
//!
//! More information:
//!  - [WHATWG HTML specification][spec]
//!
//! [spec]: https://html.spec.whatwg.org/multipage/webappapis.html#atob

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use boa_engine::{
    js_string, Context, JsArgs, JsError, JsNativeError, JsResult, JsString, JsValue,
    NativeFunction,
};
use strand_core::error::named_error;

fn encoding_error(message: &str, context: &mut Context) -> JsError {
    named_error("EncodingError", message, context)
}

/// https://infra.spec.whatwg.org/#forgiving-base64-encode
pub fn forgiving_base64_encode(
    data: &[u16],
    context: &mut Context,
) -> JsResult<String> {
    let mut bytes = Vec::with_capacity(data.len());
    for &unit in data {
        if unit > 0xFF {
            return Err(encoding_error(
                "btoa input must be in the Latin1 range",
                context,
            ));
        }
        bytes.push(unit as u8);
    }
    Ok(STANDARD.encode(bytes))
}

/// https://infra.spec.whatwg.org/#forgiving-base64-decode
pub fn forgiving_base64_decode(
    data: &str,
    context: &mut Context,
) -> JsResult<Vec<u8>> {
    // 1. Remove ASCII whitespace from data.
    let data: String = data
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0C'))
        .collect();

    // 2. Only the strict alphabet (plus padding) is allowed.
    if !data
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
    {
        return Err(encoding_error("atob input has invalid characters", context));
    }

    // 3. Padding may only terminate the string; the stripped length must be
    //    a valid base64 quantum. Positional validation is the engine's.
    let result = if data.contains('=') {
        if data.len() % 4 != 0 {
            return Err(encoding_error("atob input has invalid length", context));
        }
        STANDARD.decode(&data)
    } else {
        if data.len() % 4 == 1 {
            return Err(encoding_error("atob input has invalid length", context));
        }
        STANDARD_NO_PAD.decode(&data)
    };

    result.map_err(|_| encoding_error("atob input is not valid base64", context))
}

pub struct Base64Api;

impl Base64Api {
    fn btoa(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let data = args.get_or_undefined(0).to_string(context)?;
        let encoded = forgiving_base64_encode(data.as_slice(), context)?;
        Ok(JsString::from(encoded).into())
    }

    fn atob(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let data = args.get_or_undefined(0).to_string(context)?;
        let data = data.to_std_string().map_err(|_| {
            JsNativeError::typ().with_message("atob input must be a valid string")
        })?;
        let bytes = forgiving_base64_decode(&data, context)?;
        // The result is a byte string: one code unit per decoded byte.
        let units: Vec<u16> = bytes.into_iter().map(u16::from).collect();
        Ok(js_string!(units).into())
    }
}

impl strand_core::Api for Base64Api {
    fn init(self, context: &mut Context) {
        context
            .register_global_builtin_callable(
                js_string!("btoa"),
                1,
                NativeFunction::from_fn_ptr(Self::btoa),
            )
            .expect("btoa should only be registered once");
        context
            .register_global_builtin_callable(
                js_string!("atob"),
                1,
                NativeFunction::from_fn_ptr(Self::atob),
            )
            .expect("atob should only be registered once");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use boa_engine::Context;

    #[test]
    fn btoa_canonical_vectors() {
        let mut context = Context::default();
        let man: Vec<u16> = "Man".encode_utf16().collect();
        assert_eq!(
            forgiving_base64_encode(&man, &mut context).unwrap(),
            "TWFu"
        );
        let empty: Vec<u16> = vec![];
        assert_eq!(forgiving_base64_encode(&empty, &mut context).unwrap(), "");
    }

    #[test]
    fn btoa_rejects_non_latin1() {
        let mut context = Context::default();
        let rocket: Vec<u16> = "🚀".encode_utf16().collect();
        let err = forgiving_base64_encode(&rocket, &mut context).unwrap_err();
        let message = format!("{err}");
        assert!(message.contains("Latin1"), "{message}");
    }

    #[test]
    fn atob_roundtrip_and_whitespace() {
        let mut context = Context::default();
        assert_eq!(
            forgiving_base64_decode("c3VyZS4=", &mut context).unwrap(),
            b"sure."
        );
        assert_eq!(
            forgiving_base64_decode(" c3Vy\nZS4= ", &mut context).unwrap(),
            b"sure."
        );
        // unpadded input is tolerated
        assert_eq!(
            forgiving_base64_decode("c3VyZS4", &mut context).unwrap(),
            b"sure."
        );
    }

    #[test]
    fn atob_rejects_bad_alphabet_and_length() {
        let mut context = Context::default();
        assert!(forgiving_base64_decode("a*bc", &mut context).is_err());
        assert!(forgiving_base64_decode("abcde", &mut context).is_err());
    }

    #[test]
    fn ascii_roundtrip() {
        let mut context = Context::default();
        for input in ["", "a", "ab", "abc", "Hello, World!"] {
            let units: Vec<u16> = input.encode_utf16().collect();
            let encoded = forgiving_base64_encode(&units, &mut context).unwrap();
            let decoded = forgiving_base64_decode(&encoded, &mut context).unwrap();
            assert_eq!(decoded, input.as_bytes());
        }
    }
}
