//! Simulated traffic for `--demo` mode.
//!
//! Registers a few services on a [`MemoryBus`] and keeps calling their
//! methods: every call is accounted in the service statistics and, when
//! tracing is on, emitted as a call/response pair in random order.

// Simulated latencies are reported to statistics as f64 seconds
#![allow(clippy::cast_precision_loss)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::debug;
use qitop_common::{Timeval, TraceEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use crate::bus::MemoryBus;

/// Method id of the `stats` built-in, called now and then like a real client.
const STATS_METHOD: u32 = 0x52;

struct DemoService {
    name: &'static str,
    location: &'static str,
    /// `(id, name, base latency in us)`
    methods: &'static [(u32, &'static str, i64)],
}

static SERVICES: [DemoService; 3] = [
    DemoService {
        name: "Camera",
        location: "demo:1001",
        methods: &[
            (100, "getImage", 8_000),
            (101, "setResolution", 400),
            (102, "getResolution", 60),
        ],
    },
    DemoService {
        name: "Motion",
        location: "demo:1002",
        methods: &[
            (100, "moveTo", 25_000),
            (101, "setStiffness", 300),
            (102, "getPosition", 90),
        ],
    },
    DemoService {
        name: "TextToSpeech",
        location: "demo:1003",
        methods: &[(100, "say", 120_000), (101, "setVolume", 200)],
    },
];

/// Fraction of calls answered with an error.
const ERROR_RATE: f64 = 0.08;

/// Random call generator over a [`MemoryBus`].
pub struct SimulatedTraffic {
    bus: MemoryBus,
    rng: StdRng,
    next_id: u32,
    clock_us: i64,
}

impl SimulatedTraffic {
    /// Register the demo services on `bus`.
    pub fn install(bus: &MemoryBus) {
        for service in &SERVICES {
            let methods: Vec<(u32, &str)> = service
                .methods
                .iter()
                .map(|&(id, name, _)| (id, name))
                .collect();
            bus.add_service(service.name, service.location, &methods);
        }
    }

    /// Generator seeded from the OS, or from `seed` for reproducible runs.
    #[must_use]
    pub fn new(bus: MemoryBus, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let clock_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX / 2));
        Self {
            bus,
            rng,
            next_id: 0,
            clock_us,
        }
    }

    /// Simulate one remote call.
    pub fn step(&mut self) {
        let service = &SERVICES[self.rng.gen_range(0..SERVICES.len())];

        if self.rng.gen_bool(0.05) {
            self.bus.record_call(service.name, STATS_METHOD, 0.000_05);
            return;
        }

        // Skewed towards the first methods so the ranking has a clear top
        let len = service.methods.len();
        let index = self.rng.gen_range(0..len).min(self.rng.gen_range(0..len));
        let (slot, _, base_us) = service.methods[index];

        let latency_us = base_us + self.rng.gen_range(0..=base_us / 2);
        self.bus.record_call(service.name, slot, latency_us as f64 / 1e6);

        self.next_id = self.next_id.wrapping_add(1);
        self.clock_us += self.rng.gen_range(100..5_000);
        let start = self.clock_us;
        let end = start + latency_us;

        let call = TraceEvent::call(self.next_id, slot, timeval(start), self.payload());
        let user_us = latency_us * self.rng.gen_range(20..80) / 100;
        let system_us = latency_us * self.rng.gen_range(1..15) / 100;
        let response = if self.rng.gen_bool(ERROR_RATE) {
            TraceEvent::error(self.next_id, slot, timeval(end), b"remote error".to_vec())
        } else {
            TraceEvent::reply(self.next_id, slot, timeval(end), self.payload())
        }
        .with_cpu(user_us, system_us);

        if self.rng.gen_bool(0.5) {
            self.bus.emit_trace(service.name, &call);
            self.bus.emit_trace(service.name, &response);
        } else {
            self.bus.emit_trace(service.name, &response);
            self.bus.emit_trace(service.name, &call);
        }
    }

    fn payload(&mut self) -> Vec<u8> {
        vec![0; self.rng.gen_range(0..512)]
    }

    /// Generate `calls_per_tick` calls every `tick` until cancelled.
    pub async fn run(mut self, tick: Duration, calls_per_tick: usize, token: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                () = tokio::time::sleep(tick) => {}
            }
            for _ in 0..calls_per_tick {
                self.step();
            }
        }
        debug!("demo traffic stopped after {} calls", self.next_id);
    }
}

fn timeval(micros: i64) -> Timeval {
    Timeval::new(micros.div_euclid(1_000_000), micros.rem_euclid(1_000_000))
}
