use boa_engine::Context;
use strand_core::Api;

pub mod body;
mod client;
pub mod fetch;
pub mod form_data;
pub mod header;
pub mod request;
pub mod response;

pub use body::{Body, BodyInit, BodyWithType};
pub use form_data::FormData;
pub use header::{Headers, HeadersClass};
pub use request::{Request, RequestClass};
pub use response::{Response, ResponseClass};

pub struct HttpApi;

impl Api for HttpApi {
    fn init(self, context: &mut Context) {
        header::HeadersApi.init(context);
        request::RequestApi.init(context);
        response::ResponseApi.init(context);
        form_data::FormDataApi.init(context);
        fetch::FetchApi.init(context);
    }
}
