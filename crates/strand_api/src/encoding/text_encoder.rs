//! The `TextEncoder` Web API class: UTF-8 encoding of strings.
//!
//! `encode(undefined)` yields an empty `Uint8Array`; unpaired surrogates
//! encode as U+FFFD, matching the standard's USVString conversion.
//!
//! More information:
//!  - [WHATWG Encoding specification][spec]
//!
//! [spec]: https://encoding.spec.whatwg.org/#interface-textencoder

use boa_engine::{
    js_string,
    object::{builtins::JsUint8Array, Object},
    property::Attribute,
    value::TryFromJs,
    Context, JsArgs, JsNativeError, JsResult, JsString, JsValue, NativeFunction,
};
use boa_gc::{Finalize, GcRefMut, Trace};
use strand_core::{
    accessor,
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
};

use crate::idl::bytes_to_uint8_array;

#[derive(Trace, Finalize)]
pub struct TextEncoder;

impl TextEncoder {
    fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message(
                        "Failed to convert js value into rust type `TextEncoder`",
                    )
                    .into()
            })
    }

    fn encoding(context: &mut Context) -> Accessor {
        accessor!(
            context,
            TextEncoder,
            "encoding",
            get:((_encoder, _context) => Ok(JsString::from("utf-8").into()))
        )
    }

    // UTF-8 encode of the USVString conversion of `input`: lone surrogates
    // become U+FFFD.
    pub fn encode(input: Option<&[u16]>) -> Vec<u8> {
        let input = input.unwrap_or(&[]);
        String::from_utf16_lossy(input).into_bytes()
    }
}

#[derive(Default, Clone, Trace, Finalize)]
pub struct TextEncoderClass;

impl TextEncoderClass {
    fn encode(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let arg = args.get_or_undefined(0);
        let bytes = match arg.as_string() {
            Some(string) => TextEncoder::encode(Some(string.as_slice())),
            // Permissive: a missing input encodes to an empty byte sequence.
            None if arg.is_undefined() => TextEncoder::encode(None),
            None => {
                let string: String = arg.try_js_into(context)?;
                let utf16: Vec<u16> = string.encode_utf16().collect();
                TextEncoder::encode(Some(&utf16))
            }
        };
        Ok(bytes_to_uint8_array(bytes, context)?.into())
    }

    fn encode_into(
        _this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let source = args.get_or_undefined(0).as_string().cloned().ok_or_else(|| {
            JsNativeError::typ().with_message("expected a string source to encodeInto")
        })?;
        let destination: JsUint8Array =
            args.get_or_undefined(1).try_js_into(context)?;
        let capacity = destination.length(context)?;

        // Write whole code points only; stop once the next one would not fit.
        let mut read: u64 = 0;
        let mut written: u64 = 0;
        for ch in char::decode_utf16(source.as_slice().iter().copied()) {
            let ch = ch.unwrap_or('\u{FFFD}');
            let mut buf = [0u8; 4];
            let encoded = ch.encode_utf8(&mut buf).as_bytes();
            if written as usize + encoded.len() > capacity {
                break;
            }
            for &byte in encoded {
                destination.fill(
                    byte,
                    Some(written as usize),
                    Some(written as usize + 1),
                    context,
                )?;
                written += 1;
            }
            read += ch.len_utf16() as u64;
        }

        let result = boa_engine::object::ObjectInitializer::new(context)
            .property(js_string!("read"), read, Attribute::all())
            .property(js_string!("written"), written, Attribute::all())
            .build();
        Ok(result.into())
    }
}

impl NativeClass for TextEncoderClass {
    type Instance = TextEncoder;

    const NAME: &'static str = "TextEncoder";

    fn constructor(
        _this: &JsNativeObject<TextEncoder>,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<TextEncoder> {
        Ok(TextEncoder)
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let encoding = TextEncoder::encoding(class.context());
        class
            .accessor(js_string!("encoding"), encoding, Attribute::all())
            .method(
                js_string!("encode"),
                1,
                NativeFunction::from_fn_ptr(TextEncoderClass::encode),
            )
            .method(
                js_string!("encodeInto"),
                2,
                NativeFunction::from_fn_ptr(TextEncoderClass::encode_into),
            );

        Ok(())
    }
}

pub struct TextEncoderApi;

impl strand_core::Api for TextEncoderApi {
    fn init(self, context: &mut Context) {
        register_global_class::<TextEncoderClass>(context)
            .expect("The `TextEncoder` class shouldn't exist yet");
    }
}

#[cfg(test)]
mod test {
    use super::TextEncoder;

    #[test]
    fn encodes_ascii() {
        let input: Vec<u16> = "Hello".encode_utf16().collect();
        assert_eq!(TextEncoder::encode(Some(&input)), b"Hello");
    }

    #[test]
    fn missing_input_encodes_to_empty() {
        assert!(TextEncoder::encode(None).is_empty());
    }

    #[test]
    fn lone_surrogate_becomes_replacement_char() {
        let input = [0xD800u16];
        assert_eq!(
            TextEncoder::encode(Some(&input)),
            "\u{FFFD}".as_bytes().to_vec()
        );
    }
}
