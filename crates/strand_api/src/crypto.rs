//! The `crypto` global: `randomUUID` and `getRandomValues` over the platform
//! CSPRNG.
//!
//! More information:
//!  - [W3C Web Crypto specification][spec]
//!
//! [spec]: https://w3c.github.io/webcrypto/#crypto-interface

use boa_engine::{
    js_string,
    object::{builtins::JsTypedArray, ObjectInitializer},
    property::Attribute,
    Context, JsArgs, JsBigInt, JsNativeError, JsResult, JsString, JsValue,
    NativeFunction,
};

/// getRandomValues rejects views larger than this, per the quota the Web
/// Crypto specification imposes.
const MAX_RANDOM_BYTES: usize = 65536;

fn fill_random(buffer: &mut [u8], context: &mut Context) -> JsResult<()> {
    getrandom::getrandom(buffer).map_err(|err| {
        strand_core::error::named_error(
            "OperationError",
            &format!("CSPRNG unavailable: {err}"),
            context,
        )
    })
}

/// Generates a version 4, variant 1 UUID string from CSPRNG bytes.
pub fn random_uuid(context: &mut Context) -> JsResult<String> {
    let mut bytes = [0u8; 16];
    fill_random(&mut bytes, context)?;
    bytes[6] = (bytes[6] & 0x0F) | 0x40; // version 4
    bytes[8] = (bytes[8] & 0x3F) | 0x80; // variant 10xx
    Ok(format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    ))
}

pub struct CryptoApi;

impl CryptoApi {
    const NAME: &'static str = "crypto";

    fn random_uuid(
        _this: &JsValue,
        _args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        Ok(JsString::from(random_uuid(context)?).into())
    }

    fn get_random_values(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let arg = args.get_or_undefined(0);
        let Some(obj) = arg.as_object() else {
            return Err(JsNativeError::typ()
                .with_message("getRandomValues expects an integer typed array")
                .into());
        };
        if !obj.is_typed_array() {
            return Err(JsNativeError::typ()
                .with_message("getRandomValues expects an integer typed array")
                .into());
        }

        let constructor_name: String = obj
            .get(js_string!("constructor"), context)?
            .as_object()
            .map(|c| c.get(js_string!("name"), context))
            .transpose()?
            .and_then(|name| name.as_string().map(|s| s.to_std_string_escaped()))
            .unwrap_or_default();
        let (element_width, big_int) = match constructor_name.as_str() {
            "Int8Array" | "Uint8Array" | "Uint8ClampedArray" => (1usize, false),
            "Int16Array" | "Uint16Array" => (2, false),
            "Int32Array" | "Uint32Array" => (4, false),
            "BigInt64Array" | "BigUint64Array" => (8, true),
            _ => {
                return Err(JsNativeError::typ()
                    .with_message(
                        "getRandomValues does not accept floating point arrays",
                    )
                    .into())
            }
        };

        let view: JsTypedArray = arg.try_js_into(context)?;
        let length = view.length(context)?;
        if length * element_width > MAX_RANDOM_BYTES {
            return Err(JsNativeError::range()
                .with_message(format!(
                    "getRandomValues quota exceeded: requested {} bytes, limit is {}",
                    length * element_width,
                    MAX_RANDOM_BYTES
                ))
                .into());
        }

        let mut bytes = vec![0u8; length * element_width];
        fill_random(&mut bytes, context)?;

        for (index, chunk) in bytes.chunks_exact(element_width).enumerate() {
            let mut word = [0u8; 8];
            word[..element_width].copy_from_slice(chunk);
            let raw = u64::from_le_bytes(word);
            let value: JsValue = if big_int {
                JsBigInt::from(raw as i64).into()
            } else {
                // fits in f64 exactly for widths up to 4 bytes
                JsValue::from(raw as f64)
            };
            obj.set(index, value, true, context)?;
        }

        Ok(arg.clone())
    }
}

impl strand_core::Api for CryptoApi {
    fn init(self, context: &mut Context) {
        let crypto = ObjectInitializer::new(context)
            .function(
                NativeFunction::from_fn_ptr(Self::random_uuid),
                js_string!("randomUUID"),
                0,
            )
            .function(
                NativeFunction::from_fn_ptr(Self::get_random_values),
                js_string!("getRandomValues"),
                1,
            )
            .build();

        context
            .register_global_property(js_string!(Self::NAME), crypto, Attribute::all())
            .expect("crypto api should only be registered once!")
    }
}

#[cfg(test)]
mod test {
    use super::random_uuid;
    use boa_engine::Context;
    use std::collections::HashSet;

    #[test]
    fn uuids_are_v4_and_unique() {
        let mut context = Context::default();
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let uuid = random_uuid(&mut context).unwrap();
            assert_eq!(uuid.len(), 36);
            let parts: Vec<&str> = uuid.split('-').collect();
            assert_eq!(parts.len(), 5);
            assert!(parts[2].starts_with('4'), "version nibble in {uuid}");
            assert!(
                matches!(parts[3].chars().next(), Some('8' | '9' | 'a' | 'b')),
                "variant nibble in {uuid}"
            );
            assert!(seen.insert(uuid));
        }
        assert_eq!(seen.len(), 100);
    }
}
