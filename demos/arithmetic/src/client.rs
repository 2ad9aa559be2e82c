//! Arithmetic demo client: calls `Arith.{Add,Sub,Mul,Div}` once a second
//! against random operands and notifies `Arith.Log` with each sum, the same
//! shape as the original C++ `ArithmeticClientStub` example's `run` loop.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use serde_json::json;
use tracing::{error, info};
use wire_rpc::{Client, ClientBuilder, ClientError};

#[derive(Parser)]
struct Args {
    /// TCP port to connect to.
    #[arg(long, default_value_t = 9877)]
    port: u16,
}

/// A tiny xorshift64 generator seeded from the current time — this demo has
/// no need for a full `rand`-crate dependency just to pick two operands.
struct Xorshift64(u64);

impl Xorshift64 {
    fn seeded() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E3779B97F4A7C15)
            | 1;
        Self(seed)
    }

    fn next_in_range(&mut self, low: u64, high_inclusive: u64) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        low + (self.0 % (high_inclusive - low + 1))
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let client = ClientBuilder::new()
        .default_timeout(Duration::from_secs(5))
        .connect(("127.0.0.1", args.port))
        .await?;

    let mut rng = Xorshift64::seeded();
    let mut ticks = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticks.tick().await;
        let lhs = rng.next_in_range(1, 100) as f64;
        let rhs = rng.next_in_range(1, 100) as f64;
        run_round(&client, lhs, rhs).await;
    }
}

async fn run_round(client: &Client, lhs: f64, rhs: f64) {
    report("+", lhs, rhs, client.call("Arith.Add", json!([lhs, rhs]), None).await).await;
    report("-", lhs, rhs, client.call("Arith.Sub", json!([lhs, rhs]), None).await).await;
    report("*", lhs, rhs, client.call("Arith.Mul", json!([lhs, rhs]), None).await).await;
    report("/", lhs, rhs, client.call("Arith.Div", json!([lhs, rhs]), None).await).await;

    if let Ok(sum) = client.call("Arith.Add", json!([lhs, rhs]), None).await {
        client.notify("Arith.Log", json!([sum]));
    }
}

async fn report(op: &str, lhs: f64, rhs: f64, result: Result<serde_json::Value, ClientError>) {
    match result {
        Ok(value) => info!("{lhs}{op}{rhs}={value}"),
        Err(ClientError::Timeout) => info!("timeout"),
        Err(err) => error!("{op}: {err}"),
    }
}
