//! `Event`, `CustomEvent` and `EventTarget`: the synchronous dispatch
//! substrate consumed by `AbortSignal` and `FileReader`.
//!
//! Dispatch walks a snapshot of the listener list taken at dispatch start;
//! `{once}` listeners are removed before invocation and a throwing listener
//! is reported without aborting its siblings.
//!
//! More information:
//!  - [WHATWG DOM specification][spec]
//!
//! [spec]: https://dom.spec.whatwg.org/#interface-event

use boa_engine::{
    js_string,
    object::{NativeObject, Object, PROTOTYPE},
    property::Attribute,
    value::TryFromJs,
    Context, JsArgs, JsNativeError, JsResult, JsString, JsValue, NativeFunction,
};
use boa_gc::{custom_trace, Finalize, GcRefMut, Trace};
use strand_core::{
    accessor,
    event_loop::report_error,
    native::{
        register_global_class, Accessor, ClassBuilder, JsNativeObject, NativeClass,
    },
    value::IntoJs,
};

pub struct Event {
    type_: String,
    bubbles: bool,
    cancelable: bool,
    default_prevented: bool,
    target: JsValue,
    current_target: JsValue,
    stop_propagation: bool,
    stop_immediate: bool,
    // `CustomEvent` payload; undefined for plain events
    detail: JsValue,
}

impl Finalize for Event {}

unsafe impl Trace for Event {
    custom_trace!(this, {
        mark(&this.target);
        mark(&this.current_target);
        mark(&this.detail);
    });
}

impl Event {
    pub fn new(type_: &str) -> Self {
        Self {
            type_: type_.to_string(),
            bubbles: false,
            cancelable: false,
            default_prevented: false,
            target: JsValue::null(),
            current_target: JsValue::null(),
            stop_propagation: false,
            stop_immediate: false,
            detail: JsValue::undefined(),
        }
    }

    pub fn with_init(type_: &str, init: &EventInit) -> Self {
        let mut event = Self::new(type_);
        event.bubbles = init.bubbles;
        event.cancelable = init.cancelable;
        event.detail = init.detail.clone();
        event
    }

    pub fn type_(&self) -> &str {
        &self.type_
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    pub fn prevent_default(&mut self) {
        if self.cancelable {
            self.default_prevented = true;
        }
    }

    pub fn try_from_js(value: &JsValue) -> JsResult<GcRefMut<'_, Object, Self>> {
        value
            .as_object()
            .and_then(|obj| obj.downcast_mut::<Self>())
            .ok_or_else(|| {
                JsNativeError::typ()
                    .with_message("Failed to convert js value into rust type `Event`")
                    .into()
            })
    }
}

#[derive(Default)]
pub struct EventInit {
    bubbles: bool,
    cancelable: bool,
    detail: JsValue,
}

impl TryFromJs for EventInit {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        let mut init = EventInit::default();
        let Some(obj) = value.as_object() else {
            return Ok(init);
        };
        if obj.has_property(js_string!("bubbles"), context)? {
            init.bubbles = obj.get(js_string!("bubbles"), context)?.to_boolean();
        }
        if obj.has_property(js_string!("cancelable"), context)? {
            init.cancelable = obj.get(js_string!("cancelable"), context)?.to_boolean();
        }
        if obj.has_property(js_string!("detail"), context)? {
            init.detail = obj.get(js_string!("detail"), context)?;
        }
        Ok(init)
    }
}

pub struct EventClass;

impl EventClass {
    fn type_(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Event,
            "type",
            get:((event, context) => Ok(event.type_.clone().into_js(context)))
        )
    }

    fn bubbles(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Event,
            "bubbles",
            get:((event, _context) => Ok(event.bubbles.into()))
        )
    }

    fn cancelable(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Event,
            "cancelable",
            get:((event, _context) => Ok(event.cancelable.into()))
        )
    }

    fn default_prevented(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Event,
            "defaultPrevented",
            get:((event, _context) => Ok(event.default_prevented.into()))
        )
    }

    fn target(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Event,
            "target",
            get:((event, _context) => Ok(event.target.clone()))
        )
    }

    fn current_target(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Event,
            "currentTarget",
            get:((event, _context) => Ok(event.current_target.clone()))
        )
    }

    fn prevent_default(
        this: &JsValue,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut event = Event::try_from_js(this)?;
        event.prevent_default();
        Ok(JsValue::undefined())
    }

    fn stop_propagation(
        this: &JsValue,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut event = Event::try_from_js(this)?;
        event.stop_propagation = true;
        Ok(JsValue::undefined())
    }

    fn stop_immediate_propagation(
        this: &JsValue,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<JsValue> {
        let mut event = Event::try_from_js(this)?;
        event.stop_propagation = true;
        event.stop_immediate = true;
        Ok(JsValue::undefined())
    }

    fn define_common(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let type_ = Self::type_(class.context());
        let bubbles = Self::bubbles(class.context());
        let cancelable = Self::cancelable(class.context());
        let default_prevented = Self::default_prevented(class.context());
        let target = Self::target(class.context());
        let current_target = Self::current_target(class.context());

        class
            .accessor(js_string!("type"), type_, Attribute::all())
            .accessor(js_string!("bubbles"), bubbles, Attribute::all())
            .accessor(js_string!("cancelable"), cancelable, Attribute::all())
            .accessor(
                js_string!("defaultPrevented"),
                default_prevented,
                Attribute::all(),
            )
            .accessor(js_string!("target"), target, Attribute::all())
            .accessor(js_string!("currentTarget"), current_target, Attribute::all())
            .method(
                js_string!("preventDefault"),
                0,
                NativeFunction::from_fn_ptr(Self::prevent_default),
            )
            .method(
                js_string!("stopPropagation"),
                0,
                NativeFunction::from_fn_ptr(Self::stop_propagation),
            )
            .method(
                js_string!("stopImmediatePropagation"),
                0,
                NativeFunction::from_fn_ptr(Self::stop_immediate_propagation),
            );
        Ok(())
    }
}

impl NativeClass for EventClass {
    type Instance = Event;

    const NAME: &'static str = "Event";

    const LENGTH: usize = 1;

    fn constructor(
        _this: &JsNativeObject<Event>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<Event> {
        let type_: String = args.get_or_undefined(0).try_js_into(context)?;
        let init: EventInit = args.get_or_undefined(1).try_js_into(context)?;
        Ok(Event::with_init(&type_, &init))
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        EventClass::define_common(class)
    }
}

pub struct CustomEventClass;

impl CustomEventClass {
    fn detail(context: &mut Context) -> Accessor {
        accessor!(
            context,
            Event,
            "detail",
            get:((event, _context) => Ok(event.detail.clone()))
        )
    }
}

impl NativeClass for CustomEventClass {
    type Instance = Event;

    const NAME: &'static str = "CustomEvent";

    const LENGTH: usize = 1;

    fn constructor(
        _this: &JsNativeObject<Event>,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<Event> {
        let type_: String = args.get_or_undefined(0).try_js_into(context)?;
        let init: EventInit = args.get_or_undefined(1).try_js_into(context)?;
        Ok(Event::with_init(&type_, &init))
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        let event_prototype = class
            .context()
            .global_object()
            .get(JsString::from(EventClass::NAME), class.context())?
            .as_object()
            .and_then(|constructor| {
                constructor
                    .get(PROTOTYPE, class.context())
                    .ok()
                    .and_then(|proto| proto.as_object().cloned())
            });
        let detail = Self::detail(class.context());

        EventClass::define_common(class)?;
        class.accessor(js_string!("detail"), detail, Attribute::all());
        if let Some(proto) = event_prototype {
            class.inherit(proto);
        }
        Ok(())
    }
}

#[derive(Clone, Trace, Finalize)]
struct ListenerEntry {
    type_: String,
    callback: JsValue,
    once: bool,
    capture: bool,
}

/// The listener list of an event target, embeddable in any native type that
/// dispatches events.
#[derive(Default, Trace, Finalize)]
pub struct EventTarget {
    listeners: Vec<ListenerEntry>,
}

struct ListenerOptions {
    once: bool,
    capture: bool,
}

impl TryFromJs for ListenerOptions {
    fn try_from_js(value: &JsValue, context: &mut Context) -> JsResult<Self> {
        // Either a boolean `capture` flag or an options bag.
        if let Some(obj) = value.as_object() {
            let once = obj.get(js_string!("once"), context)?.to_boolean();
            let capture = obj.get(js_string!("capture"), context)?.to_boolean();
            Ok(Self { once, capture })
        } else {
            Ok(Self {
                once: false,
                capture: value.to_boolean(),
            })
        }
    }
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, type_: String, callback: JsValue, options: ListenerOptions) {
        // Insertion order is preserved; duplicate (type, callback, capture)
        // registrations are ignored.
        if self.listeners.iter().any(|entry| {
            entry.type_ == type_
                && entry.callback == callback
                && entry.capture == options.capture
        }) {
            return;
        }
        self.listeners.push(ListenerEntry {
            type_,
            callback,
            once: options.once,
            capture: options.capture,
        });
    }

    fn remove(&mut self, type_: &str, callback: &JsValue, capture: bool) {
        self.listeners.retain(|entry| {
            !(entry.type_ == type_
                && &entry.callback == callback
                && entry.capture == capture)
        });
    }

    /// Snapshots the listeners for `type_` and strips `{once}` entries from
    /// the live list before any of them runs.
    fn snapshot(&mut self, type_: &str) -> Vec<ListenerEntry> {
        let snapshot: Vec<ListenerEntry> = self
            .listeners
            .iter()
            .filter(|entry| entry.type_ == type_)
            .cloned()
            .collect();
        self.listeners
            .retain(|entry| entry.type_ != type_ || !entry.once);
        snapshot
    }

    pub fn has_listeners(&self, type_: &str) -> bool {
        self.listeners.iter().any(|entry| entry.type_ == type_)
    }
}

/// Native types that own an [`EventTarget`].
pub trait EventTargeted: NativeObject {
    fn event_target(&mut self) -> &mut EventTarget;
}

/// Synchronously dispatches `event` on `target`.
///
/// Returns `!event.defaultPrevented`.
pub fn dispatch_event<T: EventTargeted>(
    target: &JsNativeObject<T>,
    event: &JsNativeObject<Event>,
    context: &mut Context,
) -> JsResult<bool> {
    {
        let mut event = event.deref_mut();
        event.target = target.to_inner();
        event.current_target = target.to_inner();
        event.stop_propagation = false;
        event.stop_immediate = false;
    }

    let snapshot = {
        let type_ = event.deref().type_.clone();
        target.deref_mut().event_target().snapshot(&type_)
    };

    for entry in snapshot {
        if event.deref().stop_immediate {
            break;
        }
        let Some(callback) = entry.callback.as_callable() else {
            continue;
        };
        if let Err(err) = callback.call(&target.to_inner(), &[event.to_inner()], context)
        {
            // Listener exceptions are reported; remaining listeners still run.
            report_error(&err);
        }
    }

    Ok(!event.deref().default_prevented)
}

pub struct EventTargetMethods;

impl EventTargetMethods {
    fn add_event_listener<I: EventTargeted>(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let target: JsNativeObject<I> = JsNativeObject::try_from(this.clone())?;
        let type_: String = args.get_or_undefined(0).try_js_into(context)?;
        let callback = args.get_or_undefined(1).clone();
        if callback.is_null_or_undefined() {
            return Ok(JsValue::undefined());
        }
        let options: ListenerOptions = args.get_or_undefined(2).try_js_into(context)?;
        target
            .deref_mut()
            .event_target()
            .add(type_, callback, options);
        Ok(JsValue::undefined())
    }

    fn remove_event_listener<I: EventTargeted>(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let target: JsNativeObject<I> = JsNativeObject::try_from(this.clone())?;
        let type_: String = args.get_or_undefined(0).try_js_into(context)?;
        let callback = args.get_or_undefined(1).clone();
        let options: ListenerOptions = args.get_or_undefined(2).try_js_into(context)?;
        target
            .deref_mut()
            .event_target()
            .remove(&type_, &callback, options.capture);
        Ok(JsValue::undefined())
    }

    fn dispatch_event<I: EventTargeted>(
        this: &JsValue,
        args: &[JsValue],
        context: &mut Context,
    ) -> JsResult<JsValue> {
        let target: JsNativeObject<I> = JsNativeObject::try_from(this.clone())?;
        let event: JsNativeObject<Event> =
            JsNativeObject::try_from(args.get_or_undefined(0).clone())?;
        let not_prevented = dispatch_event(&target, &event, context)?;
        Ok(not_prevented.into())
    }

    /// Defines `addEventListener`, `removeEventListener` and `dispatchEvent`
    /// on a class whose instances own an [`EventTarget`].
    pub fn define<I: EventTargeted>(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        class
            .method(
                js_string!("addEventListener"),
                2,
                NativeFunction::from_fn_ptr(Self::add_event_listener::<I>),
            )
            .method(
                js_string!("removeEventListener"),
                2,
                NativeFunction::from_fn_ptr(Self::remove_event_listener::<I>),
            )
            .method(
                js_string!("dispatchEvent"),
                1,
                NativeFunction::from_fn_ptr(Self::dispatch_event::<I>),
            );
        Ok(())
    }
}

/// Instance type of the standalone `EventTarget` class.
#[derive(Default, Trace, Finalize)]
pub struct PlainEventTarget {
    target: EventTarget,
}

impl EventTargeted for PlainEventTarget {
    fn event_target(&mut self) -> &mut EventTarget {
        &mut self.target
    }
}

pub struct EventTargetClass;

impl NativeClass for EventTargetClass {
    type Instance = PlainEventTarget;

    const NAME: &'static str = "EventTarget";

    fn constructor(
        _this: &JsNativeObject<PlainEventTarget>,
        _args: &[JsValue],
        _context: &mut Context,
    ) -> JsResult<PlainEventTarget> {
        Ok(PlainEventTarget::default())
    }

    fn init(class: &mut ClassBuilder<'_, '_>) -> JsResult<()> {
        EventTargetMethods::define::<PlainEventTarget>(class)
    }
}

pub struct EventApi;

impl strand_core::Api for EventApi {
    fn init(self, context: &mut Context) {
        register_global_class::<EventClass>(context)
            .expect("The `Event` class shouldn't exist yet");
        register_global_class::<CustomEventClass>(context)
            .expect("The `CustomEvent` class shouldn't exist yet");
        register_global_class::<EventTargetClass>(context)
            .expect("The `EventTarget` class shouldn't exist yet");
    }
}
