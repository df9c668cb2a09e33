//! The `FormData` Web API class and its `multipart/form-data` encoder.
//!
//! Multipart bodies carry a fresh random boundary and RFC 7578 field
//! encoding; file entries keep their filename and content type.
//!
//! More information:
//!  - [WHATWG XHR specification][spec]
//!
//! [spec]: https://xhr.spec.whatwg.org/#interface-formdata

use boa_engine::{
    js_string, object::Object, Context, JsArgs, JsError, JsNativeError, JsResult,
    JsValue, NativeFunction,
};
use boa_gc::{empty_trace, Finalize, GcRefMut, Trace};
use rand::{distributions::Alphanumeric, Rng};
use strand_core::{
    iterators::{PairIterable, PairIterableMethods, PairIteratorClass, PairValue},
    native::{
        register_global_class, ClassBuilder, JsNativeObject, NativeClass,
    },
    value::IntoJs,
};

use crate::file::{
    blob::Blob,
    file::{File, FileClass},
};

#[derive(Clone)]
pub enum FormDataEntryValue {
    Text(String),
    File { blob: Blob, filename: String },
}

#[derive(Default, Clone)]
pub struct FormData {
    entries: Vec<(String, FormDataEntryValue)>,
}

impl Finalize for FormData {}

unsafe impl Trace for FormData {
    empty_trace!();
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_text(&mut self, name: String, value: String) {
        self.entries.push((name, FormDataEntryValue::Text(value)));
    }

    pub fn append_file(&mut self, name: String, blob: Blob, filename: String) {
        self.entries
            .push((name, FormDataEntryValue::File { blob, filename }));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(entry_name, _)| entry_name != name);
    }

    pub fn get(&self, name: &str) -> Option<FormDataEntryValue> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, value)| value.clone())
    }

    pub fn get_all(&self, name: &str) -> Vec<FormDataEntryValue> {
        self.entries
            .iter()
            .filter(|(entry_name, _)| entry_name == name)
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(entry_name, _)| entry_name == name)
    }

    /// https://xhr.spec.whatwg.org/#dom-formdata-set
    pub fn set(&mut self, name: String, value: FormDataEntryValue) {
        let mut replaced = false;
        self.entries.retain_mut(|entry| {
            if entry.0 != name {
                return true;
            }
            if replaced {
                return false;
            }
            entry.1 = value.clone();
            replaced = true;
            true
        });
        if !replaced {
            self.entries.push((name, value));
        }
    }

    /// RFC 7578 field name escaping.
    fn escape_name(name: &str) -> String {
        name.replace('\r', "%0D")
            .replace('\n', "%0A")
            .replace('"', "%22")
    }

    /// Serializes to `multipart/form-data` with a fresh random boundary.
    pub fn encode_multipart(&self) -> (Vec<u8>, String) {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        let boundary = format!("----StrandFormBoundary{suffix}");

        let mut bytes: Vec<u8> = Vec::new();
        for (name, value) in &self.entries {
            bytes.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match value {
                FormDataEntryValue::Text(text) => {
                    bytes.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            Self::escape_name(name)
                        )
                        .as_bytes(),
                    );
                    bytes.extend_from_slice(text.as_bytes());
                    bytes.extend_from_slice(b"\r\n");
                }
                FormDataEntryValue::File { blob, filename } => {
                    bytes.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            Self::escape_name(name),
                            Self::escape_name(filename)
                        )
                        .as_bytes(),
                    );
                    let content_type = match blob.type_() {
                        type_ if type_.is_empty() => {
                            "application/octet-stream".to_string()
                        }
                        type_ => type_,
                    };
                    bytes.extend_from_slice(
                        format!("Content-Type: {content_type}\r\n\r\n").as_bytes(),
                    );
                    bytes.extend_from_slice(&blob.read_bytes().unwrap_or_default());
                    bytes.extend_from_slice(b"\r\n");
                }
            }
        }
        bytes.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        (bytes, boundary)
    }
}

impl FormDataEntryValue {
    fn into_js_value(self, context: &mut Context) -> JsResult<JsValue> {
        match self {
            FormDataEntryValue::Text(text) => Ok(text.into_js(context)),
            FormDataEntryValue::File { blob, filename } => Ok(JsNativeObject::new::<
                FileClass,
            >(
                File::from_blob(blob, filename),
                context,
            )?
            .to_inner()),
        }
    }
}

impl FormData {
    pub fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message(
                        "Failed to convert js value into rust type `FormData`",
                    )
                    .into()
            })
    }

    fn entry_from_args(
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<(String, FormDataEntryValue)> {
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        let value = args.get_or_undefined(1);
        if let Ok(blob) = Blob::from_blob_like(value) {
            let filename: Option<String> =
                args.get_or_undefined(2).try_js_into(context)?;
            let filename = filename
                .or_else(|| {
                    value
                        .as_object()
                        .and_then(|obj| obj.downcast_ref::<File>())
                        .map(|file| file.name())
                })
                .unwrap_or_else(|| "blob".to_string());
            Ok((name, FormDataEntryValue::File { blob, filename }))
        } else {
            let text: String = value
                .to_string(context)
                .map_err(JsError::from)?
                .to_std_string_escaped();
            Ok((name, FormDataEntryValue::Text(text)))
        }
    }
}

pub struct FormDataClass;

impl FormDataClass {
    fn append(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let (name, value) = FormData::entry_from_args(args, context)?;
        let mut form_data = FormData::try_from_js(this)?;
        form_data.entries.push((name, value));
        Ok(JsValue::undefined())
    }

    fn set(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let (name, value) = FormData::entry_from_args(args, context)?;
        let mut form_data = FormData::try_from_js(this)?;
        form_data.set(name, value);
        Ok(JsValue::undefined())
    }

    fn delete(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut form_data = FormData::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        form_data.remove(&name);
        Ok(JsValue::undefined())
    }

    fn get(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        let value = FormData::try_from_js(this)?.get(&name);
        match value {
            Some(value) => value.into_js_value(context),
            None => Ok(JsValue::null()),
        }
    }

    fn get_all(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        let values = FormData::try_from_js(this)?.get_all(&name);
        let mut converted = Vec::with_capacity(values.len());
        for value in values {
            converted.push(value.into_js_value(context)?);
        }
        Ok(boa_engine::object::builtins::JsArray::from_iter(converted, context).into())
    }

    fn has(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let form_data = FormData::try_from_js(this)?;
        let name: String = args.get_or_undefined(0).try_js_into(context)?;
        Ok(form_data.contains(&name).into())
    }
}

impl PairIterable for FormData {
    fn pair_iterable_len(&self) -> JsResult<usize> {
        Ok(self.entries.len())
    }

    fn pair_iterable_get(
        &self,
        index: usize,
        context: &mut Context,
    ) -> JsResult<PairValue> {
        let (name, value) = self.entries.get(index).cloned().ok_or_else(|| {
            JsError::from_native(
                JsNativeError::range().with_message("FormData iteration out of bounds"),
            )
        })?;
        Ok(PairValue {
            key: name.into_js(context),
            value: value.into_js_value(context)?,
        })
    }
}

pub struct FormDataIteratorClass;

impl PairIteratorClass for FormDataIteratorClass {
    type Iterable = FormData;

    const NAME: &'static str = "FormData Iterator";
}

impl NativeClass for FormDataClass {
    type Instance = FormData;

    const NAME: &'static str = "FormData";

    fn constructor(
        _this: &JsNativeObject<FormData>,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<FormData> {
        Ok(FormData::new())
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        class
            .method(
                js_string!("append"),
                2,
                NativeFunction::from_fn_ptr(Self::append),
            )
            .method(js_string!("set"), 2, NativeFunction::from_fn_ptr(Self::set))
            .method(
                js_string!("delete"),
                1,
                NativeFunction::from_fn_ptr(Self::delete),
            )
            .method(js_string!("get"), 1, NativeFunction::from_fn_ptr(Self::get))
            .method(
                js_string!("getAll"),
                1,
                NativeFunction::from_fn_ptr(Self::get_all),
            )
            .method(js_string!("has"), 1, NativeFunction::from_fn_ptr(Self::has));
        PairIterableMethods::<FormDataIteratorClass>::define_pair_iterable_methods(
            class,
        )?;
        Ok(())
    }
}

pub struct FormDataApi;

impl strand_core::Api for FormDataApi {
    fn init(self, context: &mut Context) {
        register_global_class::<FormDataClass>(context)
            .expect("The `FormData` class shouldn't exist yet");
        register_global_class::<FormDataIteratorClass>(context)
            .expect("The `FormData Iterator` class shouldn't exist yet");
    }
}

#[cfg(test)]
mod test {
    use super::{FormData, FormDataEntryValue};

    #[test]
    fn multipart_layout() {
        let mut form = FormData::new();
        form.append_text("message".into(), "Hello".into());
        form.append_file(
            "upload".into(),
            crate::file::blob::Blob::from_bytes(b"abc".to_vec(), "text/plain"),
            "a.txt".into(),
        );

        let (bytes, boundary) = form.encode_multipart();
        let text = String::from_utf8(bytes).unwrap();
        assert!(boundary.starts_with("----StrandFormBoundary"));
        assert!(text.starts_with(&format!("--{boundary}\r\n")));
        assert!(text
            .contains("Content-Disposition: form-data; name=\"message\"\r\n\r\nHello"));
        assert!(text.contains(
            "Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\""
        ));
        assert!(text.contains("Content-Type: text/plain\r\n\r\nabc"));
        assert!(text.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[test]
    fn boundaries_are_fresh() {
        let form = FormData::new();
        let (_, first) = form.encode_multipart();
        let (_, second) = form.encode_multipart();
        assert_ne!(first, second);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut form = FormData::new();
        form.append_text("a".into(), "1".into());
        form.append_text("b".into(), "2".into());
        form.append_text("a".into(), "3".into());
        form.set("a".into(), FormDataEntryValue::Text("9".into()));
        assert_eq!(form.get_all("a").len(), 1);
        assert!(matches!(
            form.get("a"),
            Some(FormDataEntryValue::Text(value)) if value == "9"
        ));
    }
}
