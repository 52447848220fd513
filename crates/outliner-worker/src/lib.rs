//! Web worker entry point for outline extraction.
//!
//! This crate compiles to a standalone WASM module that runs inside a
//! dedicated `Worker`. The main thread posts a request object:
//!
//! - `pixels`: `Uint8ClampedArray` / `Uint8Array` of RGBA bytes
//!   (`ImageData.data` works as-is)
//! - `width`, `height`: numbers
//! - `threshold`: optional number, default 128
//!
//! The worker answers with any number of
//! `{type: "progress", percentComplete, contoursFound}` messages and then
//! exactly one `{type: "result", success, ...}` message, shaped by
//! [`outliner_pipeline::message`].
//!
//! The pipeline runs synchronously on the worker thread, so the worker
//! cannot read further messages mid-run. To cancel, the main thread calls
//! `worker.terminate()` and spawns a fresh worker.

use outliner_pipeline::message::{ProgressMessage, Request, ResultMessage, WorkerMessage};
use outliner_pipeline::{Host, Observer, PipelineError, PipelineOptions, Progress};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

/// # Worker entry point
///
/// Called automatically when the WASM module is instantiated in the
/// worker context.
#[wasm_bindgen(start)]
pub fn worker_main() {
    console_error_panic_hook::set_once();

    let global: web_sys::DedicatedWorkerGlobalScope = js_sys::global()
        .dyn_into()
        .expect_throw("not running in a DedicatedWorkerGlobalScope");

    let onmessage =
        Closure::<dyn FnMut(web_sys::MessageEvent)>::new(move |event: web_sys::MessageEvent| {
            handle_message(&event);
        });
    global.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget(); // leak — lives for the worker lifetime
}

/// Posts progress events to the main thread as they arrive.
struct PostingObserver {
    scope: web_sys::DedicatedWorkerGlobalScope,
}

impl Observer for PostingObserver {
    fn progress(&mut self, progress: Progress) {
        post(
            &self.scope,
            &WorkerMessage::Progress(ProgressMessage::from(progress)),
        );
    }
}

fn handle_message(event: &web_sys::MessageEvent) {
    let Ok(scope) = js_sys::global().dyn_into::<web_sys::DedicatedWorkerGlobalScope>() else {
        return;
    };

    let result = match parse_request(&event.data()) {
        Ok(request) => {
            let mut observer = PostingObserver {
                scope: scope.clone(),
            };
            run(request, &mut observer)
        }
        Err(e) => ResultMessage::from(Err(e)),
    };
    post(&scope, &WorkerMessage::Result(result));
}

/// Run one request to completion and build its terminal message.
pub fn run(request: Request, observer: &mut dyn Observer) -> ResultMessage {
    let outcome = request
        .into_parts(PipelineOptions::default())
        .and_then(|(request, options)| {
            let mut host = Host::new(observer);
            outliner_pipeline::process_with(request, &options, &mut host)
        });
    ResultMessage::from(outcome)
}

/// Read the request fields off a JS message object.
fn parse_request(data: &JsValue) -> Result<Request, PipelineError> {
    let field = |name: &str| {
        js_sys::Reflect::get(data, &JsValue::from_str(name))
            .map_err(|_| PipelineError::InvalidInput(format!("message has no `{name}` field")))
    };
    let dimension = |name: &str| -> Result<u32, PipelineError> {
        let value = field(name)?
            .as_f64()
            .ok_or_else(|| PipelineError::InvalidInput(format!("`{name}` is not a number")))?;
        to_integer(value)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| PipelineError::InvalidInput(format!("`{name}` is not a valid size")))
    };

    let pixels = field("pixels")?;
    if !pixels.is_object() {
        return Err(PipelineError::InvalidInput(
            "`pixels` is not a byte array".into(),
        ));
    }
    let pixels = js_sys::Uint8Array::new(&pixels).to_vec();

    let threshold = field("threshold")?;
    let threshold = if threshold.is_undefined() || threshold.is_null() {
        i64::from(PipelineOptions::DEFAULT_THRESHOLD)
    } else {
        threshold
            .as_f64()
            .and_then(to_integer)
            .ok_or_else(|| PipelineError::InvalidInput("`threshold` is not an integer".into()))?
    };

    Ok(Request {
        pixels,
        width: dimension("width")?,
        height: dimension("height")?,
        threshold,
    })
}

/// A JS number as an integer, if it is one.
#[allow(clippy::cast_possible_truncation)]
fn to_integer(value: f64) -> Option<i64> {
    (value.fract() == 0.0 && value.abs() < 9.0e15).then_some(value as i64)
}

/// Post `message` as a plain JS object.
fn post(scope: &web_sys::DedicatedWorkerGlobalScope, message: &WorkerMessage) {
    let json = serde_json::to_string(message).unwrap_or_else(|_| {
        r#"{"type":"result","success":false,"error":"failed to serialize result"}"#.to_owned()
    });
    if let Ok(value) = js_sys::JSON::parse(&json) {
        let _ = scope.post_message(&value);
    }
}
