use std::process::ExitCode;

use clap::Parser;
use serde_json::{json, Value};

use navigator::{
    config::Config,
    core::{Args, Callback, DispatchResult, Middleware},
    logging,
    net::Request,
    Engine, Exit,
};

#[derive(Parser)]
#[command(name = "navigator")]
#[command(about = "Dispatch a single request through the Navigator demo routes", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "GET")]
    method: String,

    #[arg(short, long, default_value = "/")]
    url: String,

    /// YAML settings file
    #[arg(short, long)]
    config: Option<String>,

    /// Request header, as `Name: value`
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
}

fn demo_routes(engine: &mut Engine) -> navigator::core::NavResult<()> {
    engine.route_with(
        "GET /",
        Callback::closure(|engine: &mut Engine, _: &mut Args| -> DispatchResult<Value> {
            engine.echo("Welcome to Navigator.");
            Ok(Value::Null)
        }),
        false,
        "home",
    )?;

    engine.route(
        "GET /hello/@name",
        Callback::closure(|engine: &mut Engine, args: &mut Args| -> DispatchResult<Value> {
            let name = args.first().and_then(Value::as_str).unwrap_or("stranger");
            engine.echo(&format!("Hello, {name}!"));
            Ok(Value::Null)
        }),
    )?;

    engine.route(
        "GET /api/status",
        Callback::closure(|engine: &mut Engine, _: &mut Args| -> DispatchResult<Value> {
            engine.json(json!({"status": "ok"}), 200)?;
            Ok(Value::Null)
        }),
    )?;

    engine.route(
        "GET /old",
        Callback::closure(|engine: &mut Engine, _: &mut Args| -> DispatchResult<Value> {
            engine.redirect("/", 301)?;
            Ok(Value::Null)
        }),
    )?;

    engine.register_function("admin_dashboard", |engine: &mut Engine, _: &mut Args| {
        engine.echo("Admin area.");
        Ok(Value::Null)
    });

    let locked = Middleware::closure(|_: &mut Engine, _: &mut Args| -> DispatchResult<Value> {
        Ok(Value::Bool(false))
    });
    engine.group("/admin", vec![locked], |routes| {
        routes.get("/dashboard", "admin_dashboard");
    })?;

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::load_from_yaml(path) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("Failed to load configuration: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let log_config = config.as_ref().and_then(|c| c.log.as_ref());
    if let Err(e) = logging::init(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let mut engine = Engine::new();
    if let Some(config) = &config {
        engine.apply_config(config);
    }
    if let Err(e) = demo_routes(&mut engine) {
        eprintln!("Failed to register routes: {e}");
        return ExitCode::FAILURE;
    }

    let mut request = Request::new(&cli.method.to_uppercase(), &cli.url);
    for header in &cli.headers {
        if let Some((name, value)) = header.split_once(':') {
            request = request.with_header(name.trim(), value.trim());
        }
    }

    log::info!("Dispatching {} {}", cli.method, cli.url);
    let exit = match engine.handle(request) {
        Ok(exit) => exit,
        Err(e) => {
            eprintln!("Request failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Ok(response) = engine.response() {
        let response = response.lock();
        println!("{}", response.status_line());
        for (name, value) in response.headers() {
            println!("{name}: {value}");
        }
        println!();
    }
    println!("{}", engine.output().wire_string());

    match exit {
        Exit::Halted { code } if code >= 400 && !engine.test_mode() => ExitCode::FAILURE,
        Exit::Failed { .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}
