//! Conversions between Web IDL buffer types and host byte vectors.

use boa_engine::{
    object::builtins::{JsArrayBuffer, JsDataView, JsTypedArray, JsUint8Array},
    value::TryFromJs,
    Context, JsNativeError, JsResult, JsValue,
};

pub trait BufferSource {
    /// Gets a copy of the bytes held by the buffer source.
    ///
    /// https://webidl.spec.whatwg.org/#dfn-get-buffer-source-copy
    fn clone_data(&self, context: &mut Context) -> JsResult<Vec<u8>>;
}

// Reads through a `Uint8Array` view so the buffer is left attached.
fn array_buffer_bytes(
    buffer: JsArrayBuffer,
    context: &mut Context,
) -> JsResult<Vec<u8>> {
    let view = JsUint8Array::from_array_buffer(buffer, context)?;
    let length = view.length(context)?;
    let mut bytes = Vec::with_capacity(length);
    for i in 0..length {
        bytes.push(view.get(i, context)?.to_uint8(context)?);
    }
    Ok(bytes)
}

impl BufferSource for JsArrayBuffer {
    fn clone_data(&self, context: &mut Context) -> JsResult<Vec<u8>> {
        array_buffer_bytes(self.clone(), context)
    }
}

impl BufferSource for JsDataView {
    fn clone_data(&self, context: &mut Context) -> JsResult<Vec<u8>> {
        let buffer: JsArrayBuffer = self.buffer(context)?.try_js_into(context)?;
        let offset = self.byte_offset(context)? as usize;
        let length = self.byte_length(context)? as usize;

        let buffer = buffer.clone_data(context)?;

        if offset + length > buffer.len() {
            return Err(JsNativeError::typ()
                .with_message("DataView byte range is out of bounds")
                .into());
        }

        Ok(buffer[offset..offset + length].to_vec())
    }
}

impl BufferSource for JsTypedArray {
    fn clone_data(&self, context: &mut Context) -> JsResult<Vec<u8>> {
        let buffer: JsArrayBuffer = self.buffer(context)?.try_js_into(context)?;
        let offset = self.byte_offset(context)?;
        let length = self.byte_length(context)?;

        let buffer = buffer.clone_data(context)?;

        if offset + length > buffer.len() {
            return Err(JsNativeError::typ()
                .with_message("TypedArray byte range is out of bounds")
                .into());
        }

        Ok(buffer[offset..offset + length].to_vec())
    }
}

pub enum JsBufferSource {
    ArrayBuffer(JsArrayBuffer),
    TypedArray(JsTypedArray),
    DataView(JsDataView),
}

impl TryFromJs for JsBufferSource {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let Some(js_object) = value.as_object() else {
            return Err(JsNativeError::typ()
                .with_message("Expected `JsObject`")
                .into());
        };

        if js_object.is_array_buffer() {
            Ok(Self::ArrayBuffer(value.try_js_into(context)?))
        } else if js_object.is_typed_array() {
            Ok(Self::TypedArray(value.try_js_into(context)?))
        } else if js_object.is_data_view() {
            Ok(Self::DataView(value.try_js_into(context)?))
        } else {
            Err(JsNativeError::typ()
                .with_message("The provided value is not of type `BufferSource`")
                .into())
        }
    }
}

impl BufferSource for JsBufferSource {
    fn clone_data(&self, context: &mut Context) -> JsResult<Vec<u8>> {
        match self {
            Self::ArrayBuffer(buffer) => buffer.clone_data(context),
            Self::TypedArray(array) => array.clone_data(context),
            Self::DataView(view) => view.clone_data(context),
        }
    }
}

/// Builds a `Uint8Array` over a fresh buffer holding `bytes`.
pub fn bytes_to_uint8_array(
    bytes: Vec<u8>,
    context: &mut Context,
) -> JsResult<JsUint8Array> {
    let buffer = JsArrayBuffer::from_byte_block(bytes, context)?;
    JsUint8Array::from_array_buffer(buffer, context)
}

/// Builds an `ArrayBuffer` holding `bytes`.
pub fn bytes_to_array_buffer(
    bytes: Vec<u8>,
    context: &mut Context,
) -> JsResult<JsArrayBuffer> {
    JsArrayBuffer::from_byte_block(bytes, context)
}

// https://webidl.spec.whatwg.org/#idl-types

pub type Any = JsValue;
pub type Octet = u8;
pub type Short = i16;
pub type UnsignedShort = u16;
pub type Long = i32;
pub type UnsignedLong = u32;
pub type LongLong = i64;
pub type UnsignedLongLong = u64;
pub type UnrestrictedDouble = f64;

pub type Number = f64;
