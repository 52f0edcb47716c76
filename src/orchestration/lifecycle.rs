//! Request lifecycle
//!
//! The `start` operation walks the route table for the current request,
//! running middleware and handlers under the configured output buffering,
//! and settles the miss cases (403, 405, 404) once the scan ends.

use std::sync::Arc;

use log::{debug, trace, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::Engine;
use crate::core::{
    callback::{Handler, Middleware, Target},
    context::{keys, truthy},
    dispatcher::{Dispatcher, Phase},
    error::{DispatchResult, NavResult},
    traits::{Args, Controller},
};
use crate::{net::Response, routing::Route};

/// How a dispatched request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    Completed,
    /// A halt cut the request short after its response was sent.
    Halted { code: u16 },
    /// An error was turned into the 500 page.
    Failed { message: String },
}

/// A middleware entry ready to run.
enum Runnable {
    Closure(Handler),
    Object(Arc<dyn Controller>),
}

/// The `start` operation.
pub fn start(engine: &mut Engine, _: &mut Args) -> DispatchResult<Value> {
    let request = engine.request()?.lock().clone();
    let response = engine.response()?;
    let router = engine.router()?;

    // Phase 1: pick up settings that changed since the services were built
    let case_sensitive = engine.vars().get_flag(keys::CASE_SENSITIVE);
    let content_length = engine.vars().get_flag(keys::CONTENT_LENGTH);
    let v2 = engine.vars().get_flag(keys::OUTPUT_BUFFERING);
    {
        let mut table = router.lock();
        table.case_sensitive = case_sensitive;
        table.reset_cursor();
    }
    {
        let mut res = response.lock();
        res.content_length = content_length;
        res.v2_output_buffering = v2;
    }
    if v2 {
        // Closed by `stop`
        engine.output_mut().begin_capture();
    }

    // Phase 2: route
    let mut dispatched = false;
    let mut middleware_failed = false;
    loop {
        let Some(route) = router.lock().route(&request) else {
            break;
        };
        debug!(
            "{} {} matched '{}' -> {}",
            request.method,
            request.url,
            route.pattern,
            route.callback.describe()
        );

        let mut params = route.param_values();
        if route.pass_route {
            params.push(route.to_value());
        }

        if route.is_streamed {
            open_stream(&route, &response)?;
        }

        if !route.middleware.is_empty()
            && process_middleware(engine, &route, Phase::Before, &response)?
        {
            middleware_failed = true;
            break;
        }

        let capture = !v2 && !route.is_streamed;
        let callback = route.callback.clone();
        let proceed = staged(engine, capture, &response, |engine| {
            Dispatcher::execute(engine, &callback, &mut params)
        })?;

        if !route.middleware.is_empty()
            && process_middleware(engine, &route, Phase::After, &response)?
        {
            middleware_failed = true;
            break;
        }

        dispatched = true;
        if !truthy(&proceed) {
            break;
        }

        trace!("handler passed, continuing to the next route");
        router.lock().next();
        dispatched = false;
    }

    // Phase 3: settle
    if request.method == "HEAD" {
        response.lock().clear_body();
    }

    if middleware_failed {
        debug!("middleware rejected {} {}", request.method, request.url);
        engine.run("halt", vec![json!(403), json!("Forbidden"), json!(true)])?;
    } else if !dispatched {
        let rejected = router.lock().rejects_method(&request);
        if rejected {
            engine.run(
                "halt",
                vec![json!(405), json!("Method Not Allowed"), json!(true)],
            )?;
        } else {
            engine.run("notFound", Args::new())?;
        }
    }

    Ok(Value::Null)
}

/// Sends the headers of a streamed route up front. A `status` entry in the
/// declared headers selects the status code.
fn open_stream(route: &Route, response: &Arc<Mutex<Response>>) -> NavResult<()> {
    let mut res = response.lock();
    if !route.streamed_headers.is_empty() {
        let status = route
            .streamed_headers
            .iter()
            .find(|(name, _)| name == "status")
            .and_then(|(_, value)| value.parse::<u16>().ok())
            .unwrap_or(200);
        res.set_status(status)?;
        for (name, value) in route.streamed_headers.iter().filter(|(n, _)| n != "status") {
            res.header(name, value.clone());
        }
    }
    res.header("X-Accel-Buffering", "no");
    res.header("Connection", "close");
    res.content_length = false;
    res.send_headers();
    res.mark_as_sent();
    Ok(())
}

/// Runs one stage, optionally inside its own capture scope. On success the
/// captured output is appended to the response body; on any interrupt the
/// scopes the stage opened are dropped.
fn staged<F>(
    engine: &mut Engine,
    capture: bool,
    response: &Arc<Mutex<Response>>,
    stage: F,
) -> DispatchResult<Value>
where
    F: FnOnce(&mut Engine) -> DispatchResult<Value>,
{
    let level = engine.output().level();
    if capture {
        engine.output_mut().begin_capture();
    }

    match stage(engine) {
        Ok(value) => {
            if capture {
                engine.output_mut().unwind_to(level + 1);
                let captured = engine.output_mut().end_capture();
                response.lock().write(&captured);
            }
            Ok(value)
        }
        Err(interrupt) => {
            engine.output_mut().unwind_to(level);
            Err(interrupt)
        }
    }
}

/// Runs the route middleware for `phase`, in declared order before the
/// handler and reversed after it. Returns true when one of them returned
/// `false`.
fn process_middleware(
    engine: &mut Engine,
    route: &Route,
    phase: Phase,
    response: &Arc<Mutex<Response>>,
) -> DispatchResult<bool> {
    let method = match phase {
        Phase::Before => "before",
        Phase::After => "after",
    };
    let ordered: Vec<&Middleware> = match phase {
        Phase::Before => route.middleware.iter().collect(),
        Phase::After => route.middleware.iter().rev().collect(),
    };

    for middleware in ordered {
        let mut args: Args = vec![Value::Object(route.params_map())];

        let runnable = match middleware {
            Middleware::Closure(handler) if phase == Phase::Before => {
                Some(Runnable::Closure(handler.clone()))
            }
            Middleware::Closure(_) => None,
            Middleware::Instance(obj) => obj
                .has_method(method)
                .then(|| Runnable::Object(obj.clone())),
            Middleware::Class(class) => {
                middleware_instance(engine, class, &args)
                    .filter(|obj| obj.has_method(method))
                    .map(Runnable::Object)
            }
        };
        let Some(runnable) = runnable else {
            trace!("no {method} step in {middleware:?}");
            continue;
        };

        let capture = !response.lock().v2_output_buffering && !route.is_streamed;
        let result = staged(engine, capture, response, |engine| match &runnable {
            Runnable::Closure(handler) => handler(engine, &mut args),
            Runnable::Object(obj) => obj.call(method, engine, &mut args),
        })?;

        if result == Value::Bool(false) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Builds a class middleware through the resolver when one applies, else
/// through the class registry.
fn middleware_instance(engine: &mut Engine, class: &str, args: &Args) -> Option<Arc<dyn Controller>> {
    let target = Target::Class(class.to_string());
    let instance = if engine.dispatcher().must_use_resolver(&target) {
        engine.dispatcher_mut().resolve_class(class, args)
    } else {
        Dispatcher::construct(engine, class)
    };
    if instance.is_none() {
        warn!("skipping middleware '{class}': it could not be constructed");
    }
    instance
}
