//! # TickOS Example Firmware
//!
//! A small sensor pipeline exercising every primitive:
//!
//! | Task        | Priority    | Behavior                                       |
//! |-------------|-------------|------------------------------------------------|
//! | `sensor`    | High        | samples every 10 ms, sends to `SAMPLES`        |
//! | `filter`    | Normal      | averages samples under `STATS_LOCK`            |
//! | `heartbeat` | BelowNormal | gives `HEARTBEAT` every 500 ms                 |
//! | `monitor`   | Low         | waits for both event bits, reads the average   |
//!
//! `monitor` and `filter` share `STATS_LOCK`. While `monitor` holds it and
//! `filter` waits, `monitor` runs at `filter`'s priority, so `heartbeat`
//! cannot starve `filter` through it.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use panic_halt as _;

use tickos::kernel;
use tickos::{
    BinarySemaphore, CountingSemaphore, EventFlags, KernelError, Mutex, Priority, Queue, Stack,
    Timeout, INFINITE,
};

// ---------------------------------------------------------------------------
// Shared objects
// ---------------------------------------------------------------------------

const SAMPLE_READY: u32 = 1 << 0;
const HEARTBEAT_SEEN: u32 = 1 << 1;

const SAMPLE_PERIOD_TICKS: u32 = 10;

static SAMPLES: Queue<u32, 8> = Queue::new();
static STATS_LOCK: Mutex = Mutex::new();
static EVENTS: EventFlags = EventFlags::new();
static HEARTBEAT: BinarySemaphore = BinarySemaphore::new(false);
/// Bounds how many samples may be averaged before `monitor` reports.
static BATCH: CountingSemaphore = CountingSemaphore::new(16, 16);

static AVERAGE: AtomicU32 = AtomicU32::new(0);
static BATCH_SUM: AtomicU32 = AtomicU32::new(0);

static SENSOR_STACK: Stack<1024> = Stack::new();
static FILTER_STACK: Stack<1024> = Stack::new();
static HEARTBEAT_STACK: Stack<512> = Stack::new();
static MONITOR_STACK: Stack<1024> = Stack::new();

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

/// **Sensor** (High): strictly periodic through `delay_until`.
fn sensor_task() -> ! {
    let mut next = kernel::now();
    let mut reading: u32 = 0;
    loop {
        next = next.add_ticks(SAMPLE_PERIOD_TICKS);
        let _ = kernel::delay_until(next);

        // Stand-in for an ADC conversion
        reading = reading.wrapping_mul(1_103_515_245).wrapping_add(12_345) >> 16;

        // A full queue means the filter fell behind; drop the sample
        if SAMPLES.send(reading, Timeout::millis(2)).is_ok() {
            EVENTS.set(SAMPLE_READY);
        }
    }
}

/// **Filter** (Normal): running average of a batch of samples.
fn filter_task() -> ! {
    let mut count: u32 = 0;
    loop {
        let Ok(sample) = SAMPLES.receive(INFINITE) else {
            continue;
        };
        if BATCH.take(INFINITE).is_err() {
            continue;
        }
        if STATS_LOCK.lock(INFINITE).is_ok() {
            count = count.saturating_add(1);
            let sum = BATCH_SUM.load(Ordering::Relaxed).wrapping_add(sample);
            BATCH_SUM.store(sum, Ordering::Relaxed);
            AVERAGE.store(sum / count, Ordering::Relaxed);
            let _ = STATS_LOCK.unlock();
        }
    }
}

/// **Heartbeat** (BelowNormal): proves the low half of the system runs.
fn heartbeat_task() -> ! {
    loop {
        let _ = kernel::delay_ms(500);
        HEARTBEAT.give();
        EVENTS.set(HEARTBEAT_SEEN);
    }
}

/// **Monitor** (Low): reports once both a sample and a heartbeat arrived.
fn monitor_task() -> ! {
    loop {
        let Ok(_) = EVENTS.wait_all(SAMPLE_READY | HEARTBEAT_SEEN, Timeout::millis(2000)) else {
            continue;
        };
        EVENTS.clear(SAMPLE_READY | HEARTBEAT_SEEN);
        let _ = HEARTBEAT.try_take();

        if STATS_LOCK.lock(Timeout::millis(50)).is_ok() {
            let _average = AVERAGE.load(Ordering::Relaxed);
            // Open the next batch
            while BATCH.count() < BATCH.max() {
                let _ = BATCH.give();
            }
            let _ = STATS_LOCK.unlock();
        }
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

fn checked<T>(result: Result<T, KernelError>, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("{}: {}", what, err),
    }
}

/// Firmware entry point. Initializes the kernel, creates tasks, and starts
/// the scheduler. Does not return.
#[entry]
fn main() -> ! {
    let Some(cp) = cortex_m::Peripherals::take() else {
        panic!("core peripherals already taken");
    };

    checked(kernel::init(), "kernel init");

    checked(
        kernel::create_task(&SENSOR_STACK, Priority::High, sensor_task, "sensor"),
        "create sensor",
    );
    checked(
        kernel::create_task(&FILTER_STACK, Priority::Normal, filter_task, "filter"),
        "create filter",
    );
    checked(
        kernel::create_task(&HEARTBEAT_STACK, Priority::BelowNormal, heartbeat_task, "heartbeat"),
        "create heartbeat",
    );
    checked(
        kernel::create_task(&MONITOR_STACK, Priority::Low, monitor_task, "monitor"),
        "create monitor",
    );

    // Start the scheduler; does not return
    kernel::start(cp)
}
