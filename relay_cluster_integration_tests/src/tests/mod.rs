// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Different test scenarios are defined here

use clap::Parser;
use rand::distributions::Alphanumeric;
use rand::thread_rng;
use rand::Rng;
use relay::concurrency::{sleep, Duration, Instant};
use relay::InstanceId;
use relay_cluster::Instance;

pub mod serve;

fn random_name() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Wait until `observer`'s registry lists `member`. Returns whether it did in time.
async fn wait_for_member(observer: &Instance, member: InstanceId, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if observer.registry().snapshot().metadata(&member).is_some() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[derive(Parser, Debug, Clone)]
pub enum TestCase {
    /// Exercise ADDRESSED, ANY and AGGREGATE calls across instances over localhost TCP
    RoundTrip(round_trip::RoundTripConfig),
    /// Test the cookie handshake between instances
    AuthHandshake(auth_handshake::AuthHandshakeConfig),
    /// Run one long-lived instance, for multi-process clusters
    Serve(serve::ServeConfig),
    /// Not-a-Node: Don't run any test and exit with code 0
    Nan,
}

/// Run a test case, returning its exit code. Negative codes are failures.
pub async fn run(case: TestCase) -> i32 {
    match case {
        TestCase::RoundTrip(config) => round_trip::test(config).await,
        TestCase::AuthHandshake(config) => auth_handshake::test(config).await,
        TestCase::Serve(config) => serve::test(config).await,
        TestCase::Nan => {
            sleep(Duration::from_secs(2)).await;
            0
        }
    }
}

#[cfg(test)]
mod cases {
    use super::*;

    #[relay::concurrency::test(flavor = "multi_thread", worker_threads = 4)]
    async fn round_trip_over_tcp() {
        let _ = env_logger::builder().is_test(true).try_init();
        let code = round_trip::test(round_trip::RoundTripConfig { instances: 3 }).await;
        assert_eq!(0, code);
    }

    #[relay::concurrency::test(flavor = "multi_thread", worker_threads = 4)]
    async fn auth_handshake_over_tcp() {
        let _ = env_logger::builder().is_test(true).try_init();
        let code = auth_handshake::test(auth_handshake::AuthHandshakeConfig {
            cookie: "cookie".to_string(),
        })
        .await;
        assert_eq!(0, code);
    }
}
