//! Arithmetic demo service: `Arith.Add/Sub/Mul/Div` (Return) and
//! `Arith.Log` (Notify), the same four operations the original C++
//! `ArithmeticService` example exposed over `goa::rpc`.

use clap::Parser;
use serde_json::json;
use tracing::info;
use wire_rpc::{JsonType, ParamSpec, Server};

#[derive(Parser)]
struct Args {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 9877)]
    port: u16,
}

fn binary_params() -> Vec<ParamSpec> {
    vec![
        ParamSpec::new("lhs", JsonType::Double),
        ParamSpec::new("rhs", JsonType::Double),
    ]
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let arith = wire_rpc::Service::builder()
        .add_return("Add", binary_params(), |req| async move {
            let (lhs, rhs) = lhs_rhs(&req);
            Ok(json!(lhs + rhs))
        })
        .add_return("Sub", binary_params(), |req| async move {
            let (lhs, rhs) = lhs_rhs(&req);
            Ok(json!(lhs - rhs))
        })
        .add_return("Mul", binary_params(), |req| async move {
            let (lhs, rhs) = lhs_rhs(&req);
            Ok(json!(lhs * rhs))
        })
        .add_return("Div", binary_params(), |req| async move {
            let (lhs, rhs) = lhs_rhs(&req);
            // Matches the original: division by zero yields `inf`, it is
            // not turned into an RPC error.
            Ok(json!(lhs / rhs))
        })
        .add_notify("Log", vec![ParamSpec::new("value", JsonType::Double)], |req| async move {
            let value = req["params"][0].as_f64().unwrap_or_default();
            info!(value, "Arith.Log");
        })
        .build();

    let server = Server::builder().add_service("Arith", arith).build();

    info!(port = args.port, "arithmetic server listening");
    server.serve(("127.0.0.1", args.port)).await
}

fn lhs_rhs(request: &serde_json::Value) -> (f64, f64) {
    let params = request["params"].as_array().cloned().unwrap_or_default();
    (
        params[0].as_f64().unwrap_or_default(),
        params[1].as_f64().unwrap_or_default(),
    )
}
