//! The `TextDecoder` Web API class over `encoding_rs`.
//!
//! Non-fatal by default: invalid sequences decode to U+FFFD. Fatal mode
//! surfaces an `EncodingError`. Streaming decodes (`{stream: true}`) keep
//! undecoded suffix bytes in the I/O queue between calls.
//!
//! More information:
//!  - [WHATWG Encoding specification][spec]
//!
//! [spec]: https://encoding.spec.whatwg.org/#interface-textdecoder

use std::io::Write;

use boa_engine::{
    js_string, object::Object, property::Attribute, Context, JsArgs, JsError,
    JsNativeError, JsResult, JsValue, NativeFunction,
};
use boa_gc::{Finalize, GcRefMut, Trace};
use encoding_rs::{Decoder, DecoderResult, Encoding};
use strand_core::{
    accessor,
    error::named_error,
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
    value::{IntoJs, TryFromJs},
};

use crate::idl::{BufferSource, JsBufferSource};

#[derive(Trace, Finalize)]
pub struct TextDecoder {
    #[unsafe_ignore_trace]
    encoding: &'static Encoding,
    #[unsafe_ignore_trace]
    decoder: Decoder,
    io_queue: Vec<u8>,
    ignore_bom: bool,
    fatal: bool,
    do_not_flush: bool,
}

#[derive(Trace, Finalize, Default)]
pub struct TextDecoderOptions {
    fatal: bool,
    ignore_bom: bool,
}

impl TryFromJs for TextDecoderOptions {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let obj = value.as_object().ok_or_else(|| {
            JsError::from_native(JsNativeError::typ().with_message("Expected `JsObject`"))
        })?;
        let def = TextDecoderOptions::default();
        let fatal = if obj.has_property(js_string!("fatal"), context)? {
            obj.get(js_string!("fatal"), context)?
                .try_js_into(context)?
        } else {
            def.fatal
        };
        let ignore_bom = if obj.has_property(js_string!("ignoreBOM"), context)? {
            obj.get(js_string!("ignoreBOM"), context)?
                .try_js_into(context)?
        } else {
            def.ignore_bom
        };
        Ok(Self { fatal, ignore_bom })
    }
}

#[derive(Trace, Finalize, Default)]
pub struct TextDecodeOptions {
    stream: bool,
}

impl TryFromJs for TextDecodeOptions {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let obj = value.as_object().ok_or_else(|| {
            JsError::from_native(JsNativeError::typ().with_message("Expected `JsObject`"))
        })?;
        let def = TextDecodeOptions::default();
        let stream = if obj.has_property(js_string!("stream"), context)? {
            obj.get(js_string!("stream"), context)?
                .try_js_into(context)?
        } else {
            def.stream
        };
        Ok(Self { stream })
    }
}

impl TextDecoder {
    fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message(
                        "Failed to convert js value into rust type `TextDecoder`",
                    )
                    .into()
            })
    }

    // https://encoding.spec.whatwg.org/#dom-textdecoder
    fn new(
        label: Option<String>,
        options: Option<TextDecoderOptions>,
    ) -> Result<TextDecoder, ()> {
        let label = label.unwrap_or("utf-8".to_string());
        let options = options.unwrap_or_default();

        // 1. Let encoding be the result of getting an encoding from label.
        // 2. If encoding is failure or replacement, then throw a RangeError.
        let encoding = Encoding::for_label_no_replacement(label.as_bytes()).ok_or(())?;

        Ok(TextDecoder {
            encoding,
            decoder: if options.ignore_bom {
                encoding.new_decoder_without_bom_handling()
            } else {
                encoding.new_decoder()
            },
            io_queue: Vec::new(),
            ignore_bom: options.ignore_bom,
            fatal: options.fatal,
            do_not_flush: false,
        })
    }

    fn encoding(&self) -> String {
        self.encoding.name().to_lowercase()
    }

    // https://encoding.spec.whatwg.org/#dom-textdecoder-decode
    fn decode(
        &mut self,
        input: Option<&[u8]>,
        options: Option<TextDecodeOptions>,
        context: &mut Context,
    ) -> JsResult<Vec<u16>> {
        let input = input.unwrap_or_default();
        let options = options.unwrap_or_default();

        // 1. If this's do not flush is false, reset decoder state and I/O
        //    queue.
        if !self.do_not_flush {
            self.decoder = if self.ignore_bom {
                self.encoding.new_decoder_without_bom_handling()
            } else {
                self.encoding.new_decoder()
            };
            self.io_queue.clear();
        };

        // 2. Set this's do not flush to options["stream"].
        self.do_not_flush = options.stream;

        // 3. If input is given, push a copy of input to this's I/O queue.
        self.io_queue.write(input).map_err(|_| {
            JsNativeError::error()
                .with_message("IO error when writing to IO queue in TextDecoder")
        })?;

        // 4-5. Process the queue through the decoder; on a partial chunk the
        //      undecoded suffix stays queued for the next call.
        let mut output: Vec<u16> = Vec::with_capacity(
            self.decoder
                .max_utf16_buffer_length(self.io_queue.len())
                .expect("If usize overflows, then we cannot alloc this"),
        );
        output.resize(output.capacity(), 0);

        let (read, written) = if self.fatal {
            let (result, read, written) =
                self.decoder.decode_to_utf16_without_replacement(
                    &self.io_queue,
                    &mut output,
                    !self.do_not_flush,
                );

            if matches!(result, DecoderResult::Malformed(_, _)) {
                return Err(named_error(
                    "EncodingError",
                    "The encoded data was not valid",
                    context,
                ));
            };

            (read, written)
        } else {
            let (_result, read, written, _had_errors) = self.decoder.decode_to_utf16(
                &self.io_queue,
                &mut output,
                !self.do_not_flush,
            );

            (read, written)
        };

        self.io_queue.drain(0..read);
        output.truncate(written);

        Ok(output)
    }
}

#[derive(Default, Clone, Trace, Finalize)]
pub struct TextDecoderClass;

impl TextDecoderClass {
    fn encoding(context: &mut Context) -> Accessor {
        accessor!(
            context,
            TextDecoder,
            "encoding",
            get:((this, context) => Ok(this.encoding().into_js(context)))
        )
    }
    fn fatal(context: &mut Context) -> Accessor {
        accessor!(
            context,
            TextDecoder,
            "fatal",
            get:((this, _context) => Ok(this.fatal.into()))
        )
    }
    fn ignore_bom(context: &mut Context) -> Accessor {
        accessor!(
            context,
            TextDecoder,
            "ignoreBOM",
            get:((this, _context) => Ok(this.ignore_bom.into()))
        )
    }

    fn decode(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let input = args.get_or_undefined(0);
        let bytes = if input.is_undefined() {
            None
        } else {
            let source: JsBufferSource = input.try_js_into(context)?;
            Some(source.clone_data(context)?)
        };
        let options: Option<TextDecodeOptions> =
            args.get_or_undefined(1).try_js_into(context)?;

        let mut text_decoder = TextDecoder::try_from_js(this)?;
        let result = text_decoder.decode(bytes.as_deref(), options, context)?;

        Ok(js_string!(result).into())
    }
}

impl NativeClass for TextDecoderClass {
    type Instance = TextDecoder;

    const NAME: &'static str = "TextDecoder";

    fn constructor(
        _this: &JsNativeObject<TextDecoder>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<TextDecoder> {
        let label: Option<String> = args.get_or_undefined(0).try_js_into(context)?;
        let options: Option<TextDecoderOptions> =
            args.get_or_undefined(1).try_js_into(context)?;
        TextDecoder::new(label, options).map_err(|()| {
            JsNativeError::range()
                .with_message("Failed to construct 'TextDecoder'")
                .into()
        })
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let encoding = Self::encoding(class.context());
        let fatal = Self::fatal(class.context());
        let ignore_bom = Self::ignore_bom(class.context());
        class
            .accessor(js_string!("encoding"), encoding, Attribute::all())
            .accessor(js_string!("fatal"), fatal, Attribute::all())
            .accessor(js_string!("ignoreBOM"), ignore_bom, Attribute::all())
            .method(
                js_string!("decode"),
                1,
                NativeFunction::from_fn_ptr(TextDecoderClass::decode),
            );

        Ok(())
    }
}

pub struct TextDecoderApi;

impl strand_core::Api for TextDecoderApi {
    fn init(self, context: &mut Context) {
        register_global_class::<TextDecoderClass>(context)
            .expect("The `TextDecoder` class shouldn't exist yet");
    }
}
