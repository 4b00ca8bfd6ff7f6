use esp_config::{generate_config, ConfigOption, DisplayHint, Stability, Validator, Value};

fn main() {
    // emit config
    generate_config(
        "scm2010-pm",
        &[
            ConfigOption {
                name: String::from("hibernation-limit-max"),
                description: String::from("Number of hibernation entries allowed within one hibernation \
                limit window. Further qualifying idle periods fall back to deep sleep."),
                default_value: Value::Integer(10),
                constraint: Some(Validator::NonNegativeInteger),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: String::from("hibernation-limit-duration"),
                description: String::from("Length of the hibernation limit window in seconds."),
                default_value: Value::Integer(3600),
                constraint: Some(Validator::PositiveInteger),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: String::from("rtc-ratio-invalid-time"),
                description: String::from("Seconds after which the RTC-to-machine-time ratio is considered \
                stale and recalibrated before the next low power entry."),
                default_value: Value::Integer(600),
                constraint: Some(Validator::PositiveInteger),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: String::from("sleep-threshold-us"),
                description: String::from("Idle spans (in microseconds) shorter than this never enter a \
                low power mode; the CPU only halts."),
                default_value: Value::Integer(4000 + 5000),
                constraint: Some(Validator::PositiveInteger),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: String::from("sdio-prepare-time-us"),
                description: String::from("Software preparation time of the SDIO host interface, added to \
                the sleep threshold and to the deep sleep and hibernation save times."),
                default_value: Value::Integer(0),
                constraint: Some(Validator::NonNegativeInteger),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: String::from("mtime-ticks-per-us"),
                description: String::from("Machine timer ticks per microsecond (XTAL clock divided by the \
                mtime clock divider)."),
                default_value: Value::Integer(10),
                constraint: Some(Validator::IntegerInRange(1..1000)),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: String::from("pmu-poll-limit"),
                description: String::from("Number of status polls an indirect PMU transaction may take \
                before it is treated as a fatal hardware failure."),
                default_value: Value::Integer(100_000),
                constraint: Some(Validator::PositiveInteger),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
            ConfigOption {
                name: String::from("default-wakeup-sources"),
                description: String::from("Default wakeup source mask (GPIO, RTC, UART lossless/lossy, USB, \
                SDIO, software)."),
                default_value: Value::Integer(0x7ff),
                constraint: Some(Validator::IntegerInRange(1..0x800)),
                stability: Stability::Unstable,
                active: true,
                display_hint: DisplayHint::None,
            },
        ],
        true,
        true,
    );
}
