use boa_engine::Context;
use strand_core::Api;

pub mod base64;
pub mod text_decoder;
pub mod text_encoder;

pub use base64::Base64Api;
pub use text_decoder::TextDecoderApi;
pub use text_encoder::TextEncoderApi;

pub struct EncodingApi;

impl Api for EncodingApi {
    fn init(self, context: &mut Context) {
        TextEncoderApi.init(context);
        TextDecoderApi.init(context);
        Base64Api.init(context);
    }
}
