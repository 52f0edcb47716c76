//! Built-in operations
//!
//! Every built-in is a plain handler over positional JSON arguments, seeded
//! into the dispatcher by [`Engine::init`](super::Engine::init).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use serde_json::{json, Map, Value};

use super::{lifecycle, Engine};
use crate::{
    config_error,
    core::{
        callback::{Callback, Handler},
        context::keys,
        error::{DispatchResult, Interrupt},
        traits::Args,
    },
    net::{response::HTTP_DATE, Expiry},
    routing::ResourceOptions,
    view::escape,
};

/// Names bound to the built-in operations. None of them can be remapped.
pub const BUILTIN_OPERATIONS: [&str; 21] = [
    "start",
    "stop",
    "route",
    "halt",
    "error",
    "notFound",
    "render",
    "redirect",
    "etag",
    "lastModified",
    "json",
    "jsonHalt",
    "jsonp",
    "post",
    "put",
    "patch",
    "delete",
    "group",
    "getUrl",
    "download",
    "resource",
];

/// Handlers for every entry of [`BUILTIN_OPERATIONS`].
pub fn builtins() -> Vec<(&'static str, Handler)> {
    fn handler(
        f: fn(&mut Engine, &mut Args) -> DispatchResult<Value>,
    ) -> Handler {
        Arc::new(f)
    }

    vec![
        ("start", handler(lifecycle::start)),
        ("stop", handler(stop)),
        ("route", handler(|e, a| map_route(e, a, ""))),
        ("halt", handler(halt)),
        ("error", handler(error)),
        ("notFound", handler(not_found)),
        ("render", handler(render)),
        ("redirect", handler(redirect)),
        ("etag", handler(etag)),
        ("lastModified", handler(last_modified)),
        ("json", handler(json)),
        ("jsonHalt", handler(json_halt)),
        ("jsonp", handler(jsonp)),
        ("post", handler(|e, a| map_route(e, a, "POST "))),
        ("put", handler(|e, a| map_route(e, a, "PUT "))),
        ("patch", handler(|e, a| map_route(e, a, "PATCH "))),
        ("delete", handler(|e, a| map_route(e, a, "DELETE "))),
        ("group", handler(group)),
        ("getUrl", handler(get_url)),
        ("download", handler(download)),
        ("resource", handler(resource)),
    ]
}

fn arg_str<'a>(args: &'a Args, index: usize) -> Option<&'a str> {
    args.get(index).and_then(Value::as_str)
}

fn arg_u16(args: &Args, index: usize, default: u16) -> u16 {
    args.get(index)
        .and_then(Value::as_u64)
        .and_then(|n| u16::try_from(n).ok())
        .unwrap_or(default)
}

fn arg_bool(args: &Args, index: usize, default: bool) -> bool {
    args.get(index).and_then(Value::as_bool).unwrap_or(default)
}

fn arg_object(args: &Args, index: usize) -> Map<String, Value> {
    args.get(index)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Sends the response, then stops the request unless told otherwise or
/// running in test mode.
pub fn halt(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let code = arg_u16(args, 0, 200);
    let message = arg_str(args, 1).unwrap_or_default().to_string();
    let terminate = arg_bool(args, 2, true);

    let response = engine.response()?;
    {
        let mut res = response.lock();
        if res.get_header("Cache-Control").is_none() {
            res.cache(Expiry::Disabled);
        }
        res.clear_body().set_status(code)?.write(&message);
        res.send(engine.output_mut());
    }

    if terminate && !engine.test_mode() {
        return Err(Interrupt::Halt { code, message });
    }
    Ok(Value::Null)
}

/// Sends the buffered response if nothing has been sent yet.
pub fn stop(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let response = engine.response()?;
    let mut res = response.lock();
    if res.sent() {
        return Ok(Value::Null);
    }
    if let Some(code) = args.first().and_then(Value::as_u64) {
        let code = u16::try_from(code).map_err(|_| config_error!("Invalid status code {}.", code))?;
        res.set_status(code)?;
    }
    let out = engine.output_mut();
    if res.v2_output_buffering && out.captured_len() > 0 {
        let buffered = out.end_capture();
        res.write(&buffered);
    }
    res.send(out);
    Ok(Value::Null)
}

/// Renders the 500 page for `message`.
pub fn error(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let message = arg_str(args, 0).unwrap_or("Unknown error");
    let detail = arg_str(args, 1).unwrap_or_default();
    let page = format!(
        "<h1>500 Internal Server Error</h1><h3>{}</h3><pre>{}</pre>",
        escape(message),
        escape(detail)
    );

    let response = engine.response()?;
    let mut res = response.lock();
    res.cache(Expiry::Disabled)
        .clear_body()
        .set_status(500)?
        .write(&page);
    res.send(engine.output_mut());
    Ok(Value::Null)
}

pub fn not_found(engine: &mut Engine, _: &mut Args) -> DispatchResult<Value> {
    let response = engine.response()?;
    let mut res = response.lock();
    res.clear_body()
        .set_status(404)?
        .write("<h1>404 Not Found</h1><h3>The page you have requested could not be found.</h3>");
    res.send(engine.output_mut());
    Ok(Value::Null)
}

/// Renders a template into the output, or into a view var when a key is
/// given.
pub fn render(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let file = arg_str(args, 0).unwrap_or_default().to_string();
    let data = args.get(1).and_then(Value::as_object).cloned();
    let key = arg_str(args, 2).map(str::to_string);

    let view = engine.view()?;
    let mut view = view.lock();
    match key {
        Some(key) => {
            let rendered = view.fetch(&file, data.as_ref())?;
            view.set(key, rendered);
        }
        None => view.render(&file, data.as_ref(), engine.output_mut())?,
    }
    Ok(Value::Null)
}

/// Redirects to `url`, prefixing the base URL for relative targets.
pub fn redirect(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let url = arg_str(args, 0).unwrap_or_default().to_string();
    let code = arg_u16(args, 1, 303);

    let configured = engine.vars().get_str(keys::BASE_URL).map(str::to_string);
    let base = match configured {
        Some(base) => base,
        None => engine.request()?.lock().base.clone(),
    };

    let location = if base != "/" && !url.contains("://") {
        format!("{base}{}", collapse_slashes(&format!("/{url}")))
    } else {
        url
    };
    debug!("redirecting to {location} ({code})");

    let response = engine.response()?;
    let mut res = response.lock();
    res.clear_body()
        .set_status(code)?
        .header("Location", location);
    res.send(engine.output_mut());
    Ok(Value::Null)
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Encodes `data` for the json family. With `encode` off the value must
/// already be a string.
fn encode_json(data: &Value, encode: bool, pretty: bool) -> DispatchResult<String> {
    if !encode {
        return Ok(match data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    }
    let encoded = if pretty {
        serde_json::to_string_pretty(data)?
    } else {
        serde_json::to_string(data)?
    };
    Ok(encoded)
}

/// Writes a JSON body. Args: data, code, encode, charset, pretty.
pub fn json(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let data = args.first().cloned().unwrap_or(Value::Null);
    let code = arg_u16(args, 1, 200);
    let body = encode_json(&data, arg_bool(args, 2, true), arg_bool(args, 4, false))?;
    let charset = arg_str(args, 3).unwrap_or("utf-8");

    let response = engine.response()?;
    let mut res = response.lock();
    res.set_status(code)?
        .header("Content-Type", format!("application/json; charset={charset}"))
        .write(&body);
    if res.v2_output_buffering {
        res.send(engine.output_mut());
    }
    Ok(Value::Null)
}

/// Sends a JSON body and halts.
pub fn json_halt(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let code = arg_u16(args, 1, 200);
    engine.run("json", args.clone())?;

    let response = engine.response()?;
    let (body, sent) = {
        let mut res = response.lock();
        let body = res.body().to_string();
        if !res.v2_output_buffering {
            res.clear_body();
            res.send(engine.output_mut());
        }
        (body, res.v2_output_buffering && res.sent())
    };

    // Legacy buffering already put the body on the wire
    if sent {
        debug!("JSON response already sent, halting with {code}");
        if engine.test_mode() {
            return Ok(Value::Null);
        }
        return Err(Interrupt::Halt { code, message: body });
    }
    engine.run("halt", vec![json!(code), json!(body), json!(true)])
}

/// Writes a JSONP body wrapped in the callback named by the query param.
pub fn jsonp(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let data = args.first().cloned().unwrap_or(Value::Null);
    let param = arg_str(args, 1).unwrap_or("jsonp").to_string();
    let code = arg_u16(args, 2, 200);
    let body = encode_json(&data, arg_bool(args, 3, true), arg_bool(args, 5, false))?;
    let charset = arg_str(args, 4).unwrap_or("utf-8");

    let callback = engine
        .request()?
        .lock()
        .query
        .get(&param)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let response = engine.response()?;
    let mut res = response.lock();
    res.set_status(code)?
        .header(
            "Content-Type",
            format!("application/javascript; charset={charset}"),
        )
        .write(&format!("{callback}({body});"));
    if res.v2_output_buffering {
        res.send(engine.output_mut());
    }
    Ok(Value::Null)
}

/// Answers 304 after clearing whatever the response collected so far.
fn not_modified(engine: &mut Engine) -> DispatchResult<Value> {
    let response = engine.response()?;
    let v2 = {
        let mut res = response.lock();
        res.clear();
        res.v2_output_buffering
    };
    if !v2 {
        engine.output_mut().discard_current();
    }
    engine.run("halt", vec![json!(304), json!(""), json!(true)])
}

/// Weak comparison of an entity tag against an `If-None-Match` value.
fn etag_matches(if_none_match: &str, tag: &str) -> bool {
    let opaque = |t: &str| t.trim().trim_start_matches("W/").to_string();
    let wanted = opaque(tag);
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || opaque(candidate) == wanted)
}

/// Sets `ETag` and answers 304 when the client already has it.
/// Args: id, type (`"weak"` or `"strong"`).
pub fn etag(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let id = arg_str(args, 0).unwrap_or_default().replace('"', "\\\"");
    let weak = arg_str(args, 1) == Some("weak");
    let tag = if weak {
        format!("W/\"{id}\"")
    } else {
        format!("\"{id}\"")
    };

    engine.response()?.lock().header("ETag", tag.clone());

    let if_none_match = engine
        .request()?
        .lock()
        .header("if-none-match")
        .map(str::to_string);
    match if_none_match {
        Some(header) if etag_matches(&header, &tag) => not_modified(engine),
        _ => Ok(Value::Null),
    }
}

/// Sets `Last-Modified` and answers 304 when `If-Modified-Since` equals it.
pub fn last_modified(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let timestamp = args.first().and_then(Value::as_i64).unwrap_or_default();
    let Some(at) = DateTime::<Utc>::from_timestamp(timestamp, 0) else {
        return Err(config_error!("Invalid timestamp {}.", timestamp).into());
    };

    engine
        .response()?
        .lock()
        .header("Last-Modified", at.format(HTTP_DATE).to_string());

    let since = engine
        .request()?
        .lock()
        .header("if-modified-since")
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|d| d.timestamp());
    if since == Some(timestamp) {
        return not_modified(engine);
    }
    Ok(Value::Null)
}

/// Sends a file as an attachment and stops the request.
pub fn download(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let path = arg_str(args, 0).unwrap_or_default().to_string();
    let response = engine.response()?;
    response.lock().download_file(&path, engine.output_mut())?;

    if !engine.test_mode() {
        return Err(Interrupt::Halt {
            code: response.lock().status(),
            message: String::new(),
        });
    }
    Ok(Value::Null)
}

pub fn get_url(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let alias = arg_str(args, 0).unwrap_or_default().to_string();
    let params = arg_object(args, 1);
    let url = engine.router()?.lock().get_url_by_alias(&alias, &params)?;
    Ok(Value::String(url))
}

/// Maps a string callback. Args: pattern, callback, pass_route, alias.
fn map_route(engine: &mut Engine, args: &mut Args, verb: &str) -> DispatchResult<Value> {
    let Some(callback) = arg_str(args, 1) else {
        return Err(config_error!("Route callbacks passed by name must be strings.").into());
    };
    let pattern = format!("{verb}{}", arg_str(args, 0).unwrap_or_default());
    let callback = Callback::from(callback);
    let pass_route = arg_bool(args, 2, false);
    let alias = arg_str(args, 3).unwrap_or_default().to_string();

    let router = engine.router()?;
    let route = router
        .lock()
        .map(&pattern, callback, pass_route, &alias)
        .to_value();
    Ok(route)
}

fn group(_: &mut Engine, _: &mut Args) -> DispatchResult<Value> {
    Err(config_error!("Route groups need a builder; use Engine::group.").into())
}

/// Args: pattern, controller class, options object.
pub fn resource(engine: &mut Engine, args: &mut Args) -> DispatchResult<Value> {
    let pattern = arg_str(args, 0).unwrap_or_default().to_string();
    let Some(controller) = arg_str(args, 1).map(str::to_string) else {
        return Err(config_error!("A resource needs a controller class name.").into());
    };
    let options = args
        .get(2)
        .map(ResourceOptions::from_value)
        .unwrap_or_default();
    engine
        .router()?
        .lock()
        .map_resource(&pattern, &controller, options);
    Ok(Value::Null)
}
