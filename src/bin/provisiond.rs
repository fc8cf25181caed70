use provisiond::config::{Settings, StatePaths};
use provisiond::credentials::{self, Ec2KeyPairs};
use provisiond::progress::{render, ProgressTracker};
use provisiond::queue::SqsQueue;
use provisiond::runtime::{self, Context, FatalError};
use provisiond::shared::fs_atomic;
use provisiond::variables::FunctionRegistry;

fn run(paths: &StatePaths) -> Result<(), FatalError> {
    let settings = Settings::from_env()?;

    let ec2 = Ec2KeyPairs::connect(&settings.region)?;
    let key_path = credentials::ensure_key_pair(&ec2, &paths.keys_dir(), &settings.key_name)?;

    let queue = SqsQueue::connect(&settings.region, &settings.queue_url)?;
    let tracker = ProgressTracker::new(paths.clone());

    let mut ctx = Context {
        settings,
        paths: paths.clone(),
        queue: &queue,
        key_path,
        functions: FunctionRegistry::builtin(),
        tracker,
    };
    runtime::run_loop(&mut ctx)
}

fn main() {
    let paths = StatePaths::new(Settings::state_root_from_env());
    if let Err(fault) = run(&paths) {
        // the operator page shows the fault instead of going stale
        let page = render::crash_page(&fault.to_string());
        let _ = fs_atomic::atomic_write_file(&paths.status_page_path(), page.as_bytes());
        eprintln!("{fault}");
        std::process::exit(1);
    }
}
