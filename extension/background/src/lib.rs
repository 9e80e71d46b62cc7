//! Background worker of the browser extension.
//!
//! Holds every privileged browser API and no download logic: runtime messages
//! from content scripts, debugger traffic and toolbar clicks are forwarded to
//! the native host over `ws://127.0.0.1:19988/extension`, and the host's
//! commands are executed here and answered with their id.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use js_sys::{Array, Function, Object, Reflect};
use lid_protocol::{
    BrowserCommand, Debuggee, Envelope, ExtensionMessage, HostMessage, Request, RequestId, Response,
    TabId,
};
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{CloseEvent, ErrorEvent, MessageEvent, WebSocket};

const HOST_URL: &str = "ws://127.0.0.1:19988/extension";
const RECONNECT_DELAY_MS: i32 = 2000;
const LOG_LIMIT: usize = 40;
const NOT_CONNECTED: &str = "Native host not connected";

type PendingKey = (Option<TabId>, String);

thread_local! {
    static LOG: RefCell<Vec<String>> = RefCell::new(Vec::new());
    static WS: RefCell<Option<Rc<WebSocket>>> = RefCell::new(None);
    static PENDING: RefCell<HashMap<PendingKey, Function>> = RefCell::new(HashMap::new());
}

#[wasm_bindgen(start)]
pub async fn start() {
    console_error_panic_hook::set_once();
    set_status("connecting", "Lite Image Downloader (connecting)");

    // Sessions left over from a previous worker instance
    let _ = reset_debugger().await;

    install_browser_listeners();
    connect();
}

async fn reset_debugger() -> Result<(), JsValue> {
    let targets_val = JsFuture::from(debugger_get_targets()).await?;
    let targets = Array::from(&targets_val);

    for i in 0..targets.length() {
        let target = targets.get(i);
        let attached = Reflect::get(&target, &JsValue::from_str("attached"))?
            .as_bool()
            .unwrap_or(false);
        let tab_id = Reflect::get(&target, &JsValue::from_str("tabId"))?.as_f64();

        if let (true, Some(id)) = (attached, tab_id) {
            let debuggee = to_js(&Debuggee::tab(id as TabId))?;
            let _ = JsFuture::from(debugger_detach(&debuggee)).await;
        }
    }
    Ok(())
}

fn connect() {
    let ws = match WebSocket::new(HOST_URL) {
        Ok(ws) => Rc::new(ws),
        Err(err) => {
            push_log(&format!("connect failed: {}", stringify_js_error(err)));
            schedule_reconnect();
            return;
        }
    };

    let onmessage = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
        wasm_bindgen_futures::spawn_local(async move {
            if let Err(err) = handle_host_message(event).await {
                push_log(&format!("host message failed: {}", stringify_js_error(err)));
            }
        });
    });
    ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget();

    let onopen = Closure::<dyn FnMut()>::new(|| {
        set_status("connected", "Lite Image Downloader connected");
        push_log("connected");
    });
    ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));
    onopen.forget();

    let onerror = Closure::<dyn FnMut(ErrorEvent)>::new(|e: ErrorEvent| {
        set_status("error", &e.message());
    });
    ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));
    onerror.forget();

    let onclose = Closure::<dyn FnMut(CloseEvent)>::new(|_| {
        WS.with(|w| *w.borrow_mut() = None);
        fail_pending(NOT_CONNECTED);
        set_status("disconnected", "native host disconnected");
        schedule_reconnect();
    });
    ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));
    onclose.forget();

    WS.with(|w| *w.borrow_mut() = Some(ws));
}

fn schedule_reconnect() {
    let retry = Closure::once_into_js(connect);
    set_timeout(retry.unchecked_ref(), RECONNECT_DELAY_MS);
}

fn install_browser_listeners() {
    // Content script requests; `true` keeps `send_response` alive until the host answers.
    let on_message = Closure::<dyn FnMut(JsValue, JsValue, Function) -> bool>::new(
        |message: JsValue, sender: JsValue, send_response: Function| {
            let envelope: Envelope = match serde_wasm_bindgen::from_value(message) {
                Ok(envelope) => envelope,
                Err(_) => return false,
            };
            let Envelope::Request(request) = envelope else {
                return false;
            };
            let tab_id = Reflect::get(&sender, &JsValue::from_str("tab"))
                .ok()
                .and_then(|tab| Reflect::get(&tab, &JsValue::from_str("id")).ok())
                .and_then(|id| id.as_f64())
                .map(|id| id as TabId);
            forward_page_request(tab_id, request, send_response);
            true
        },
    );
    runtime_on_message_add_listener(&on_message);
    on_message.forget();

    let on_event = Closure::<dyn FnMut(JsValue, JsValue, JsValue)>::new(
        |source: JsValue, method: JsValue, params: JsValue| {
            let Ok(source) = serde_wasm_bindgen::from_value::<Debuggee>(source) else {
                return;
            };
            let _ = send_to_host(&ExtensionMessage::DebuggerEvent {
                source,
                method: method.as_string().unwrap_or_default(),
                params: serde_wasm_bindgen::from_value(params).unwrap_or(Value::Null),
            });
        },
    );
    debugger_on_event_add_listener(&on_event);
    on_event.forget();

    let on_detach =
        Closure::<dyn FnMut(JsValue, JsValue)>::new(|source: JsValue, reason: JsValue| {
            let Ok(source) = serde_wasm_bindgen::from_value::<Debuggee>(source) else {
                return;
            };
            push_log(&format!("debugger detached: tab {}", source.tab_id));
            let _ = send_to_host(&ExtensionMessage::DebuggerDetached {
                tab_id: source.tab_id,
                reason: reason.as_string(),
            });
        });
    debugger_on_detach_add_listener(&on_detach);
    on_detach.forget();

    let on_clicked = Closure::<dyn FnMut(JsValue)>::new(|tab: JsValue| {
        let tab_id = Reflect::get(&tab, &JsValue::from_str("id"))
            .ok()
            .and_then(|id| id.as_f64());
        if let Some(id) = tab_id {
            let _ = send_to_host(&ExtensionMessage::ActionClicked {
                tab_id: id as TabId,
            });
        }
    });
    action_on_clicked_add_listener(&on_clicked);
    on_clicked.forget();
}

fn forward_page_request(tab_id: Option<TabId>, request: Request, send_response: Function) {
    let id = request.id.clone();
    PENDING.with(|p| {
        p.borrow_mut()
            .insert((tab_id, id.as_str().to_string()), send_response)
    });

    if send_to_host(&ExtensionMessage::PageRequest { tab_id, request }).is_err() {
        let _ = reply_to_page(tab_id, Response::err(id, NOT_CONNECTED));
    }
}

fn reply_to_page(tab_id: Option<TabId>, response: Response) -> Result<(), JsValue> {
    let key = (tab_id, response.id.as_str().to_string());
    let Some(send_response) = PENDING.with(|p| p.borrow_mut().remove(&key)) else {
        return Ok(());
    };
    let envelope = to_js(&Envelope::Response(response))?;
    send_response.call1(&JsValue::NULL, &envelope).map(|_| ())
}

fn fail_pending(message: &str) {
    let drained: Vec<(PendingKey, Function)> =
        PENDING.with(|p| p.borrow_mut().drain().collect());
    for ((_, id), send_response) in drained {
        let response = Response::err(RequestId::new(id), message);
        if let Ok(envelope) = to_js(&Envelope::Response(response)) {
            let _ = send_response.call1(&JsValue::NULL, &envelope);
        }
    }
}

async fn handle_host_message(event: MessageEvent) -> Result<(), JsValue> {
    let text = event.data().as_string().ok_or("non-text frame")?;
    let message: HostMessage =
        serde_json::from_str(&text).map_err(|e| JsValue::from_str(&e.to_string()))?;

    match message {
        HostMessage::PageResponse { tab_id, response } => reply_to_page(tab_id, response),
        HostMessage::PageEvent { tab_id, event } => {
            let envelope = to_js(&Envelope::Event(event))?;
            // Tabs without a content script reject; nothing to deliver to.
            let _ = JsFuture::from(tabs_send_message(tab_id, &envelope)).await;
            Ok(())
        }
        HostMessage::Command { id, command } => {
            let name = command.name();
            let reply = match execute(command).await {
                Ok(result) => ExtensionMessage::CommandResult {
                    id,
                    result,
                    error: None,
                },
                Err(err) => {
                    let message = stringify_js_error(err);
                    push_log(&format!("{name} failed: {message}"));
                    ExtensionMessage::CommandResult {
                        id,
                        result: Value::Null,
                        error: Some(message),
                    }
                }
            };
            send_to_host(&reply)
        }
    }
}

async fn execute(command: BrowserCommand) -> Result<Value, JsValue> {
    match command {
        BrowserCommand::Attach { target, version } => {
            JsFuture::from(debugger_attach(&to_js(&target)?, &version)).await?;
            push_log(&format!("attached: tab {}", target.tab_id));
            Ok(Value::Null)
        }
        BrowserCommand::Detach { target } => {
            JsFuture::from(debugger_detach(&to_js(&target)?)).await?;
            Ok(Value::Null)
        }
        BrowserCommand::Send {
            target,
            method,
            params,
        } => {
            let params = if params.is_null() {
                JsValue::UNDEFINED
            } else {
                to_js(&params)?
            };
            let result =
                JsFuture::from(debugger_send_command(&to_js(&target)?, &method, &params)).await?;
            Ok(serde_wasm_bindgen::from_value(result).unwrap_or(Value::Null))
        }
        BrowserCommand::Download {
            url,
            filename,
            conflict_action,
        } => {
            let options = Object::new();
            set_field(&options, "url", &JsValue::from_str(&url))?;
            if let Some(filename) = filename {
                set_field(&options, "filename", &JsValue::from_str(&filename))?;
            }
            set_field(
                &options,
                "conflictAction",
                &JsValue::from_str(&conflict_action),
            )?;
            let download_id = JsFuture::from(downloads_download(&options)).await?;
            Ok(download_id.as_f64().map(Value::from).unwrap_or(Value::Null))
        }
        BrowserCommand::Badge {
            tab_id,
            text,
            title,
            color,
        } => {
            let tab = JsValue::from_f64(tab_id as f64);

            let details = Object::new();
            set_field(&details, "tabId", &tab)?;
            set_field(&details, "text", &JsValue::from_str(&text))?;
            JsFuture::from(action_set_badge_text(&details)).await?;

            if let Some(title) = title {
                let details = Object::new();
                set_field(&details, "tabId", &tab)?;
                set_field(&details, "title", &JsValue::from_str(&title))?;
                JsFuture::from(action_set_title(&details)).await?;
            }
            if let Some(color) = color {
                let details = Object::new();
                set_field(&details, "tabId", &tab)?;
                set_field(&details, "color", &JsValue::from_str(&color))?;
                JsFuture::from(action_set_badge_background_color(&details)).await?;
            }
            Ok(Value::Null)
        }
    }
}

fn send_to_host(message: &ExtensionMessage) -> Result<(), JsValue> {
    let ws = WS
        .with(|w| w.borrow().clone())
        .filter(|ws| ws.ready_state() == WebSocket::OPEN)
        .ok_or(NOT_CONNECTED)?;
    let text = serde_json::to_string(message).map_err(|e| JsValue::from_str(&e.to_string()))?;
    ws.send_with_str(&text)
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(JsValue::from)
}

fn set_field(obj: &Object, key: &str, value: &JsValue) -> Result<(), JsValue> {
    Reflect::set(obj, &JsValue::from_str(key), value).map(|_| ())
}

fn stringify_js_error(err: JsValue) -> String {
    if let Some(message) = Reflect::get(&err, &JsValue::from_str("message"))
        .ok()
        .and_then(|m| m.as_string())
    {
        return message;
    }
    err.as_string()
        .or_else(|| js_sys::JSON::stringify(&err).ok()?.as_string())
        .unwrap_or_else(|| format!("{:?}", err))
}

fn set_status(status: &str, title: &str) {
    let (text, rgba): (&str, [u8; 4]) = match status {
        "connected" => ("", [30, 170, 80, 255]),
        "error" => ("ERR", [200, 40, 40, 255]),
        "disconnected" => ("OFF", [120, 120, 120, 255]),
        _ => ("...", [160, 160, 160, 255]),
    };

    let color = Array::new();
    for c in rgba {
        color.push(&JsValue::from_f64(c as f64));
    }

    let text_obj = Object::new();
    let _ = set_field(&text_obj, "text", &JsValue::from_str(text));
    let _ = action_set_badge_text(&text_obj);

    let color_obj = Object::new();
    let _ = set_field(&color_obj, "color", &color);
    let _ = action_set_badge_background_color(&color_obj);

    let title_obj = Object::new();
    let _ = set_field(&title_obj, "title", &JsValue::from_str(title));
    let _ = action_set_title(&title_obj);

    persist_state(status, title);
}

fn push_log(line: &str) {
    LOG.with(|log| {
        let mut vec = log.borrow_mut();
        vec.push(line.to_string());
        if vec.len() > LOG_LIMIT {
            let excess = vec.len() - LOG_LIMIT;
            vec.drain(0..excess);
        }
        persist_log(&vec);
    });
}

fn persist_state(status: &str, message: &str) {
    let obj = Object::new();
    let state = Object::new();
    let _ = set_field(&state, "status", &JsValue::from_str(status));
    let _ = set_field(&state, "message", &JsValue::from_str(message));
    let _ = set_field(&obj, "lid_bridge_state", &state);
    let _ = storage_local_set(&obj);
}

fn persist_log(lines: &[String]) {
    let array = Array::new();
    for line in lines {
        array.push(&JsValue::from_str(line));
    }
    let obj = Object::new();
    let _ = set_field(&obj, "lid_bridge_log", &array);
    let _ = storage_local_set(&obj);
}

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = setTimeout)]
    fn set_timeout(handler: &Function, timeout: i32) -> JsValue;

    #[wasm_bindgen(js_namespace = ["chrome", "runtime", "onMessage"], js_name = addListener)]
    fn runtime_on_message_add_listener(
        cb: &Closure<dyn FnMut(JsValue, JsValue, Function) -> bool>,
    );

    #[wasm_bindgen(js_namespace = ["chrome", "tabs"], js_name = sendMessage)]
    fn tabs_send_message(tab_id: TabId, message: &JsValue) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "debugger"], js_name = attach)]
    fn debugger_attach(target: &JsValue, version: &str) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "debugger"], js_name = detach)]
    fn debugger_detach(target: &JsValue) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "debugger"], js_name = getTargets)]
    fn debugger_get_targets() -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "debugger"], js_name = sendCommand)]
    fn debugger_send_command(target: &JsValue, method: &str, params: &JsValue) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "debugger", "onEvent"], js_name = addListener)]
    fn debugger_on_event_add_listener(cb: &Closure<dyn FnMut(JsValue, JsValue, JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "debugger", "onDetach"], js_name = addListener)]
    fn debugger_on_detach_add_listener(cb: &Closure<dyn FnMut(JsValue, JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "downloads"], js_name = download)]
    fn downloads_download(options: &JsValue) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "action", "onClicked"], js_name = addListener)]
    fn action_on_clicked_add_listener(cb: &Closure<dyn FnMut(JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "action"], js_name = setBadgeText)]
    fn action_set_badge_text(details: &JsValue) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "action"], js_name = setBadgeBackgroundColor)]
    fn action_set_badge_background_color(details: &JsValue) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "action"], js_name = setTitle)]
    fn action_set_title(details: &JsValue) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "storage", "local"], js_name = set)]
    fn storage_local_set(items: &JsValue) -> js_sys::Promise;
}
