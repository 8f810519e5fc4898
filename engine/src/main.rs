use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use nitta::bus::BusNetwork;
use nitta::front::parse_algorithm;
use nitta::simulator::{simulate, traced_variables};
use nitta::spi::IoSync;
use nitta::synthesis::{synthesize, ModelState, Policy, SynthesisConfig};
use nitta::testbench::{microcode_dump, schedule_json, testbench_vectors, verify_schedule};
use nitta::value::{Fx16_32, Fx24_32, Fx32_32, Int32, Val};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum IoSyncArg {
    Sync,
    Async,
    Onboard,
}

impl From<IoSyncArg> for IoSync {
    fn from(a: IoSyncArg) -> Self {
        match a {
            IoSyncArg::Sync => IoSync::Sync,
            IoSyncArg::Async => IoSync::Async,
            IoSyncArg::Onboard => IoSync::OnBoard,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PolicyArg {
    Greedy,
    ObviousBind,
    AllThreads,
}

#[derive(Parser, Debug)]
#[command(
    name = "nitta",
    version,
    about = "Synthesizes a cycle-accurate schedule binding a dataflow algorithm onto bus-connected processing units"
)]
struct Cli {
    /// Algorithm description file
    algfile: PathBuf,

    /// Value type: int, fx16.32, fx24.32 or fx32.32
    #[arg(long = "type", default_value = "fx24.32")]
    value_type: String,

    /// Print the functional simulation trace
    #[arg(long)]
    fsim: bool,

    /// Replay the schedule tick by tick: microcode dump + testbench vectors
    #[arg(long)]
    lsim: bool,

    /// Number of simulated cycles
    #[arg(short = 'n', default_value_t = 5)]
    cycles: usize,

    /// IO synchronization mode
    #[arg(long = "io-sync", value_enum, default_value_t = IoSyncArg::Sync)]
    io_sync: IoSyncArg,

    /// Search policy
    #[arg(long, value_enum, default_value_t = PolicyArg::Greedy)]
    policy: PolicyArg,

    /// Synthesis deadline in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Write the schedule JSON here ("-" for stdout)
    #[arg(short = 'o', long = "emit-schedule")]
    emit_schedule: Option<String>,

    /// Verbose engine logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    let _ = logger.try_init();

    match cli.value_type.as_str() {
        "int" => run::<Int32>(&cli),
        "fx16.32" => run::<Fx16_32>(&cli),
        "fx24.32" => run::<Fx24_32>(&cli),
        "fx32.32" => run::<Fx32_32>(&cli),
        other => {
            eprintln!("nitta: unsupported value type '{other}'");
            ExitCode::from(2)
        }
    }
}

fn run<T: Val>(cli: &Cli) -> ExitCode {
    let source = match std::fs::read_to_string(&cli.algfile) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("nitta: cannot read {}: {e}", cli.algfile.display());
            return ExitCode::from(2);
        }
    };
    let functions = match parse_algorithm::<T>(&source) {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("nitta: {e}");
            return ExitCode::from(2);
        }
    };

    // async IO drops on an empty external queue instead of failing
    let drop_on_empty = matches!(cli.io_sync, IoSyncArg::Async);
    let cntx = if cli.fsim || cli.lsim {
        match simulate(&functions, cli.cycles, &Default::default(), drop_on_empty) {
            Ok(cntx) => Some(cntx),
            Err(e) => {
                eprintln!("nitta: {e}");
                return ExitCode::from(1);
            }
        }
    } else {
        None
    };

    if cli.fsim {
        let vars = traced_variables(&functions);
        print!("{}", cntx.as_ref().unwrap().trace(&vars));
    }

    let network = BusNetwork::default_march(cli.io_sync.into());
    let model = ModelState::new(network, functions);
    let config = SynthesisConfig {
        policy: match cli.policy {
            PolicyArg::Greedy => Policy::Greedy,
            PolicyArg::ObviousBind => Policy::ObviousBind,
            PolicyArg::AllThreads => Policy::AllThreads { k: 2, depth: 3 },
        },
        timeout: cli.timeout.map(Duration::from_secs),
        ..Default::default()
    };

    let result = match synthesize(model, &config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("nitta: {e}");
            return ExitCode::from(1);
        }
    };
    if !result.complete {
        eprintln!(
            "nitta: synthesis incomplete after {} decisions (dead end or timeout)",
            result.decisions
        );
        return ExitCode::from(1);
    }

    eprintln!(
        "nitta: schedule complete: {} decisions, {} ticks",
        result.decisions,
        result.model.network.next_tick()
    );

    if let Some(path) = &cli.emit_schedule {
        let json = schedule_json(&result.model.network.aggregated_process());
        if path == "-" {
            println!("{json}");
        } else if let Err(e) = std::fs::write(path, json) {
            eprintln!("nitta: cannot write {path}: {e}");
            return ExitCode::from(2);
        }
    }

    if cli.lsim {
        let cntx = cntx.as_ref().unwrap();
        match microcode_dump(&result.model.network) {
            Ok(words) => {
                for (i, w) in words.iter().enumerate() {
                    println!("tick {:>4}: {w}", i as i64 - 1);
                }
            }
            Err(e) => {
                eprintln!("nitta: {e}");
                return ExitCode::from(1);
            }
        }
        match testbench_vectors(&result.model.network, cntx) {
            Ok(rows) => {
                let transports = rows.iter().filter(|r| r.transport.is_some()).count();
                eprintln!("nitta: {} testbench rows, {} with transports", rows.len(), transports);
            }
            Err(e) => {
                eprintln!("nitta: {e}");
                return ExitCode::from(1);
            }
        }
        let cert = verify_schedule(&result.model, cntx);
        for (name, ok) in cert.obligations() {
            eprintln!("nitta: check {name}: {}", if ok { "pass" } else { "FAIL" });
        }
        if !cert.all_pass() {
            return ExitCode::from(1);
        }
    }

    ExitCode::SUCCESS
}
