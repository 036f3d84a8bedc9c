//! End-to-end engine behavior: exactly-once execution and notification,
//! cancellation, lifecycle, concurrency limits and the loop handshakes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use vjob::{
    Engine, EngineConfig, EngineError, EngineState, FileInfo, InfoOptions, JobHandle, JobState,
    MemoryMethod, Method, MethodContext, MethodFile, MethodTable, OpenMode, OverwriteMode, Output,
    ProgressAction, Request, SortKey, SortRule, Target, TransferOptions, TransferPhase, VfsError,
    VfsResult,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(limit: usize) -> EngineConfig {
    EngineConfig::new()
        .concurrency_limit(limit)
        .drain_poll_interval(Duration::from_millis(1))
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

struct NullFile;

impl MethodFile for NullFile {
    fn read(&mut self, _ctx: &MethodContext<'_>, _len: usize) -> VfsResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn write(&mut self, _ctx: &MethodContext<'_>, data: &[u8]) -> VfsResult<usize> {
        Ok(data.len())
    }

    fn close(self: Box<Self>, _ctx: &MethodContext<'_>) -> VfsResult<()> {
        Ok(())
    }
}

/// Method whose `open` blocks until the gate is released or the job is
/// cancelled, recording every entry.
#[derive(Default)]
struct Gate {
    released: Mutex<bool>,
    cv: Condvar,
    running: AtomicUsize,
    peak: AtomicUsize,
    entered: Mutex<HashMap<String, usize>>,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn release(&self) {
        *self.released.lock() = true;
        self.cv.notify_all();
    }

    fn entries(&self, path: &str) -> usize {
        self.entered.lock().get(path).copied().unwrap_or(0)
    }

    fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

struct GateMethod(Arc<Gate>);

impl Method for GateMethod {
    fn name(&self) -> &str {
        "gate"
    }

    fn open(
        &self,
        ctx: &MethodContext<'_>,
        target: &Target,
        _mode: OpenMode,
    ) -> VfsResult<Box<dyn MethodFile>> {
        let gate = &self.0;
        *gate.entered.lock().entry(target.path().to_string()).or_default() += 1;
        let now = gate.running.fetch_add(1, Ordering::SeqCst) + 1;
        gate.peak.fetch_max(now, Ordering::SeqCst);

        let mut released = gate.released.lock();
        while !*released && !ctx.token().is_cancelled() {
            gate.cv.wait_for(&mut released, Duration::from_millis(2));
        }
        drop(released);

        gate.running.fetch_sub(1, Ordering::SeqCst);
        ctx.check()?;
        Ok(Box::new(NullFile))
    }

    fn create(
        &self,
        _ctx: &MethodContext<'_>,
        _target: &Target,
        _mode: OpenMode,
        _exclusive: bool,
        _perm: u32,
    ) -> VfsResult<Box<dyn MethodFile>> {
        Err(VfsError::NotSupported("create"))
    }

    fn get_file_info(
        &self,
        _ctx: &MethodContext<'_>,
        target: &Target,
        _options: InfoOptions,
        _keys: &[String],
    ) -> VfsResult<FileInfo> {
        Ok(FileInfo::file(target.name(), 0, 0o644))
    }

    fn read_directory(
        &self,
        _ctx: &MethodContext<'_>,
        _target: &Target,
        _options: InfoOptions,
    ) -> VfsResult<Vec<FileInfo>> {
        Ok(Vec::new())
    }
}

fn gate_engine(limit: usize) -> (Engine, Arc<Gate>) {
    let gate = Gate::new();
    let table = MethodTable::new().with("gate", Arc::new(GateMethod(gate.clone())));
    let engine = Engine::new(config(limit), Arc::new(table)).unwrap();
    engine.start().unwrap();
    (engine, gate)
}

fn mem_engine(limit: usize) -> (Engine, Arc<MemoryMethod>) {
    let mem = Arc::new(MemoryMethod::new());
    let table = MethodTable::new().with("mem", mem.clone());
    let engine = Engine::new(config(limit), Arc::new(table)).unwrap();
    engine.start().unwrap();
    (engine, mem)
}

type Outcomes = Arc<Mutex<HashMap<JobHandle, Vec<Result<(), bool>>>>>;

/// Record callback outcomes per handle: `Ok` on success, `Err(cancelled)`.
fn recorder(outcomes: &Outcomes) -> impl FnOnce(JobHandle, VfsResult<Output>) + Send + 'static {
    let outcomes = outcomes.clone();
    move |handle, res| {
        let entry = res.map(|_| ()).map_err(|e| e.is_cancelled());
        outcomes.lock().entry(handle).or_default().push(entry);
    }
}

#[test]
fn every_job_executes_at_most_once() {
    init_tracing();
    let (engine, gate) = gate_engine(8);
    gate.release();

    let outcomes: Outcomes = Arc::default();
    for i in 0..200 {
        engine
            .submit(Request::open(format!("gate:/f{i}"), OpenMode::READ), recorder(&outcomes))
            .unwrap();
    }
    engine
        .completions()
        .run_until(|| engine.outstanding() == 0)
        .unwrap();

    for i in 0..200 {
        assert_eq!(gate.entries(&format!("/f{i}")), 1, "job f{i}");
    }
    assert_eq!(outcomes.lock().len(), 200);
    assert_eq!(engine.shutdown(), EngineState::Stopped);
}

#[test]
fn every_job_is_notified_exactly_once_under_cancel_races() {
    init_tracing();
    let (engine, gate) = gate_engine(4);
    let engine = Arc::new(engine);

    let outcomes: Outcomes = Arc::default();
    let handles: Vec<JobHandle> = (0..100)
        .map(|i| {
            engine
                .submit(Request::open(format!("gate:/r{i}"), OpenMode::READ), recorder(&outcomes))
                .unwrap()
        })
        .collect();

    let canceller = {
        let engine = engine.clone();
        let handles = handles.clone();
        thread::spawn(move || {
            for h in handles.iter().step_by(2) {
                // Ok or NotFound, never a panic or a double completion
                let _ = engine.cancel(*h);
                let _ = engine.cancel(*h);
            }
        })
    };
    gate.release();
    canceller.join().unwrap();

    engine
        .completions()
        .run_until(|| engine.outstanding() == 0)
        .unwrap();

    let outcomes = outcomes.lock();
    assert_eq!(outcomes.len(), 100);
    for h in &handles {
        assert_eq!(outcomes[h].len(), 1, "handle {h}");
    }
    // Uncancelled jobs always succeed
    for h in handles.iter().skip(1).step_by(2) {
        assert_eq!(outcomes[h][0], Ok(()));
    }
}

#[test]
fn cancel_is_idempotent_until_retired() {
    init_tracing();
    let (engine, gate) = gate_engine(2);
    let outcomes: Outcomes = Arc::default();
    let h = engine
        .submit(Request::open("gate:/idem", OpenMode::READ), recorder(&outcomes))
        .unwrap();

    assert!(engine.cancel(h).is_ok());
    assert!(engine.cancel(h).is_ok());
    assert!(engine.cancel(h).is_ok());

    engine.completions().run_until(|| outcomes.lock().contains_key(&h)).unwrap();
    assert_eq!(outcomes.lock()[&h], vec![Err(true)]);
    assert!(matches!(engine.cancel(h), Err(EngineError::NotFound(_))));
    assert!(matches!(engine.job_state(h), Err(EngineError::NotFound(_))));
    gate.release();
}

#[test]
fn submissions_before_start_are_rejected() {
    init_tracing();
    let engine = Engine::new(config(2), Arc::new(vjob::default_table())).unwrap();
    let called = Arc::new(AtomicUsize::new(0));
    let c = called.clone();
    let res = engine.submit(Request::load_directory("mem:/"), move |_, _| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    assert!(matches!(res, Err(EngineError::NotStarted)));
    assert_eq!(engine.outstanding(), 0);
    assert_eq!(engine.dispatch(), 0);
    assert_eq!(called.load(Ordering::SeqCst), 0);
    assert_eq!(engine.state(), EngineState::Uninitialized);
}

#[test]
fn second_start_fails() {
    init_tracing();
    let (engine, _) = mem_engine(2);
    assert!(matches!(
        engine.start(),
        Err(EngineError::AlreadyStarted(EngineState::Running))
    ));
    assert_eq!(engine.state(), EngineState::Running);
}

#[test]
fn executing_jobs_never_exceed_the_limit() {
    init_tracing();
    let (engine, gate) = gate_engine(3);
    let outcomes: Outcomes = Arc::default();
    for i in 0..20 {
        engine
            .submit(Request::open(format!("gate:/c{i}"), OpenMode::READ), recorder(&outcomes))
            .unwrap();
    }
    wait_until("3 running jobs", || gate.running() == 3);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(gate.running(), 3);

    gate.release();
    engine
        .completions()
        .run_until(|| engine.outstanding() == 0)
        .unwrap();
    assert!(gate.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(outcomes.lock().len(), 20);
}

#[test]
fn shutdown_from_another_thread_drains_while_owner_pumps() {
    init_tracing();
    let (engine, gate) = gate_engine(2);
    let engine = Arc::new(engine);

    let outcomes: Outcomes = Arc::default();
    for i in 0..10 {
        engine
            .submit(Request::open(format!("gate:/d{i}"), OpenMode::READ), recorder(&outcomes))
            .unwrap();
    }

    let stopper = {
        let engine = engine.clone();
        thread::spawn(move || engine.shutdown())
    };
    wait_until("draining", || engine.state() == EngineState::Draining);
    assert!(matches!(
        engine.submit(Request::load_directory("gate:/"), |_, _| {}),
        Err(EngineError::ShuttingDown)
    ));

    gate.release();
    engine
        .completions()
        .run_until(|| engine.state() == EngineState::Stopped)
        .unwrap();
    assert_eq!(stopper.join().unwrap(), EngineState::Stopped);

    assert_eq!(outcomes.lock().len(), 10);
    assert_eq!(engine.outstanding(), 0);
    assert!(matches!(
        engine.submit(Request::load_directory("gate:/"), |_, _| {}),
        Err(EngineError::Stopped)
    ));
}

#[test]
fn shutdown_on_owner_thread_pumps_completions() {
    init_tracing();
    let (engine, mem) = mem_engine(2);
    mem.insert_file("/x", b"data").unwrap();
    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..16 {
        let d = done.clone();
        engine
            .open("mem:/x", OpenMode::READ, move |_, res| {
                assert!(res.is_ok());
                d.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    // Nobody dispatched yet; shutdown must do it
    assert_eq!(engine.shutdown(), EngineState::Stopped);
    assert_eq!(done.load(Ordering::SeqCst), 16);
}

#[test]
fn simple_read_open_read_close() {
    init_tracing();
    let (engine, mem) = mem_engine(2);
    mem.insert_file("/data.bin", &(0u8..32).collect::<Vec<_>>()).unwrap();
    let completions = engine.completions();

    let file = Arc::new(Mutex::new(None));
    let f = file.clone();
    engine
        .open("mem:/data.bin", OpenMode::READ, move |_, res| {
            *f.lock() = Some(res.unwrap());
        })
        .unwrap();
    completions.run_until(|| file.lock().is_some()).unwrap();
    let handle = file.lock().clone().unwrap();

    let read = Arc::new(Mutex::new(None));
    let r = read.clone();
    engine
        .submit(Request::read(&handle, 16), move |_, res| {
            *r.lock() = Some(res);
        })
        .unwrap();
    completions.run_until(|| read.lock().is_some()).unwrap();
    let out = read.lock().take().unwrap().unwrap();
    assert_eq!(out.bytes_transferred(), 16);
    match out {
        Output::Read(data) => assert_eq!(data, (0u8..16).collect::<Vec<_>>()),
        other => panic!("unexpected {other:?}"),
    }

    let closed = Arc::new(AtomicUsize::new(0));
    let c = closed.clone();
    engine
        .close(&handle, move |_, res| {
            res.unwrap();
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    completions.run_until(|| closed.load(Ordering::SeqCst) == 1).unwrap();
    assert!(handle.is_closed());
    assert_eq!(engine.outstanding(), 0);
}

#[test]
fn cancel_before_execution_never_enters_the_method() {
    init_tracing();
    let (engine, gate) = gate_engine(2);
    let outcomes: Outcomes = Arc::default();
    engine.submit(Request::open("gate:/busy1", OpenMode::READ), recorder(&outcomes)).unwrap();
    engine.submit(Request::open("gate:/busy2", OpenMode::READ), recorder(&outcomes)).unwrap();
    wait_until("both workers busy", || gate.running() == 2);

    let victim = engine
        .submit(Request::open("gate:/victim", OpenMode::READ), recorder(&outcomes))
        .unwrap();
    assert_eq!(engine.job_state(victim).unwrap(), (JobState::Queued, false));
    engine.cancel(victim).unwrap();
    assert_eq!(engine.job_state(victim).unwrap(), (JobState::Queued, true));

    gate.release();
    engine
        .completions()
        .run_until(|| engine.outstanding() == 0)
        .unwrap();
    assert_eq!(outcomes.lock()[&victim], vec![Err(true)]);
    assert_eq!(gate.entries("/victim"), 0);
}

#[test]
fn raising_the_limit_mid_flight_starts_waiting_jobs() {
    init_tracing();
    let (engine, gate) = gate_engine(2);
    let outcomes: Outcomes = Arc::default();
    for i in 0..5 {
        engine
            .submit(Request::open(format!("gate:/l{i}"), OpenMode::READ), recorder(&outcomes))
            .unwrap();
    }
    wait_until("2 running", || gate.running() == 2);
    thread::sleep(Duration::from_millis(10));
    assert_eq!(gate.running(), 2);

    engine.set_concurrency_limit(4).unwrap();
    assert_eq!(engine.concurrency_limit(), 4);
    wait_until("4 running", || gate.running() == 4);

    gate.release();
    engine
        .completions()
        .run_until(|| engine.outstanding() == 0)
        .unwrap();
    assert_eq!(outcomes.lock().len(), 5);
    assert!(outcomes.lock().values().all(|v| v == &vec![Ok(())]));
    assert!(gate.peak.load(Ordering::SeqCst) <= 4);
}

#[test]
fn lowering_the_limit_lets_running_jobs_finish() {
    init_tracing();
    let (engine, gate) = gate_engine(4);
    let outcomes: Outcomes = Arc::default();
    for i in 0..10 {
        engine
            .submit(Request::open(format!("gate:/s{i}"), OpenMode::READ), recorder(&outcomes))
            .unwrap();
    }
    wait_until("4 running", || gate.running() == 4);

    engine.set_concurrency_limit(2).unwrap();
    assert_eq!(engine.concurrency_limit(), 2);
    // Jobs already inside the method keep running
    thread::sleep(Duration::from_millis(10));
    assert_eq!(gate.running(), 4);

    gate.peak.store(0, Ordering::SeqCst);
    gate.release();
    engine
        .completions()
        .run_until(|| engine.outstanding() == 0)
        .unwrap();

    assert_eq!(outcomes.lock().len(), 10);
    assert!(outcomes.lock().values().all(|v| v == &vec![Ok(())]));
    let peak = gate.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak after lowering was {peak}");
    // Surplus workers retire
    wait_until("surplus workers exit", || {
        engine.pool_stats().is_some_and(|s| s.threads <= 2)
    });
}

#[test]
fn read_completion_holds_the_worker_until_the_callback_ran() {
    init_tracing();
    let (engine, mem) = mem_engine(2);
    mem.insert_file("/r", b"0123456789").unwrap();
    let engine = Arc::new(engine);
    let sync = vjob::sync(Arc::new(MethodTable::new().with("mem", mem.clone())));
    let file = sync.open("mem:/r", OpenMode::READ).unwrap();

    let busy_in_callback = Arc::new(Mutex::new(None));
    let (e, b) = (engine.clone(), busy_in_callback.clone());
    engine
        .read(&file, 4, move |_, res| {
            assert_eq!(res.unwrap(), b"0123");
            *b.lock() = e.pool_stats().map(|s| s.busy);
        })
        .unwrap();
    engine
        .completions()
        .run_until(|| busy_in_callback.lock().is_some())
        .unwrap();
    assert_eq!(*busy_in_callback.lock(), Some(1));
    wait_until("worker released", || engine.pool_stats().map(|s| s.busy) == Some(0));
}

#[test]
fn ack_timeout_releases_the_worker() {
    init_tracing();
    let mem = Arc::new(MemoryMethod::new());
    mem.insert_file("/t", b"abc").unwrap();
    let table = MethodTable::new().with("mem", mem.clone());
    let engine = Engine::new(
        config(2).ack_timeout(Some(Duration::from_millis(20))),
        Arc::new(table),
    )
    .unwrap();
    engine.start().unwrap();
    let file = vjob::sync(Arc::new(MethodTable::new().with("mem", mem))).open("mem:/t", OpenMode::READ).unwrap();

    let got = Arc::new(Mutex::new(None));
    let g = got.clone();
    engine.read(&file, 3, move |_, res| *g.lock() = Some(res.unwrap())).unwrap();

    // No dispatch: the worker gives up waiting for the ack
    wait_until("worker released", || engine.pool_stats().map(|s| s.busy) == Some(0));
    assert!(got.lock().is_none());

    // The completion is still delivered exactly once
    engine.completions().run_until(|| got.lock().is_some()).unwrap();
    assert_eq!(got.lock().as_deref(), Some(&b"abc"[..]));
    assert_eq!(engine.outstanding(), 0);
}

#[test]
fn directory_batches_arrive_before_completion() {
    init_tracing();
    let mem = Arc::new(MemoryMethod::new());
    for i in 0..10 {
        mem.insert_file(&format!("/dir/f{i:02}"), b"").unwrap();
    }
    let table = MethodTable::new().with("mem", mem);
    let engine = Engine::new(config(2).default_batch_size(4), Arc::new(table)).unwrap();
    engine.start().unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let (l1, l2) = (log.clone(), log.clone());
    engine
        .load_directory(
            "mem:/dir",
            InfoOptions::default(),
            vec![SortRule::descending(SortKey::Name)],
            None,
            0,
            move |_, batch| l1.lock().push(format!("batch {}", batch.len())),
            move |_, res| l2.lock().push(format!("done {}", res.unwrap())),
        )
        .unwrap();
    engine
        .completions()
        .run_until(|| engine.outstanding() == 0)
        .unwrap();
    assert_eq!(*log.lock(), ["batch 4", "batch 4", "batch 2", "done 10"]);

    // An explicit batch size overrides the configured one
    log.lock().clear();
    let (l1, l2) = (log.clone(), log.clone());
    engine
        .load_directory(
            "mem:/dir",
            InfoOptions::default(),
            Vec::new(),
            None,
            3,
            move |_, batch| l1.lock().push(format!("batch {}", batch.len())),
            move |_, res| l2.lock().push(format!("done {}", res.unwrap())),
        )
        .unwrap();
    engine
        .completions()
        .run_until(|| engine.outstanding() == 0)
        .unwrap();
    assert_eq!(*log.lock(), ["batch 3", "batch 3", "batch 3", "batch 1", "done 10"]);
}

#[test]
fn transfer_reports_every_batch_of_chunks() {
    init_tracing();
    let (engine, mem) = mem_engine(2);
    mem.insert_file("/src", &[7u8; 128]).unwrap();

    let copying = Arc::new(Mutex::new(Vec::new()));
    let result = Arc::new(Mutex::new(None));
    let (c, r) = (copying.clone(), result.clone());
    engine
        .transfer(
            vec!["mem:/src".into()],
            vec!["mem:/dst".into()],
            TransferOptions { remove_source: false, chunk_size: 16 },
            OverwriteMode::Abort,
            3,
            move |_, p| {
                if p.phase == TransferPhase::Copying && p.bytes_copied > 0 {
                    c.lock().push(p.bytes_copied);
                }
                ProgressAction::Continue
            },
            move |_, res| *r.lock() = Some(res),
        )
        .unwrap();
    engine
        .completions()
        .run_until(|| result.lock().is_some())
        .unwrap();
    assert!(result.lock().take().unwrap().is_ok());
    // 8 chunks of 16 bytes, reported after chunks 3 and 6
    assert_eq!(*copying.lock(), [48, 96]);
}

#[test]
fn transfer_progress_can_abort() {
    init_tracing();
    let (engine, mem) = mem_engine(2);
    mem.insert_file("/src", &[9u8; 1024]).unwrap();

    let result = Arc::new(Mutex::new(None));
    let r = result.clone();
    engine
        .transfer(
            vec!["mem:/src".into()],
            vec!["mem:/dst".into()],
            TransferOptions { remove_source: false, chunk_size: 16 },
            OverwriteMode::Abort,
            1,
            |_, p| match p.phase {
                TransferPhase::Copying if p.bytes_copied >= 64 => ProgressAction::Abort,
                _ => ProgressAction::Continue,
            },
            move |_, res| *r.lock() = Some(res),
        )
        .unwrap();
    engine
        .completions()
        .run_until(|| result.lock().is_some())
        .unwrap();
    assert!(matches!(result.lock().take(), Some(Err(VfsError::Cancelled))));
    assert!(mem.contents("/src").is_some());
}

#[test]
fn transfer_completes_with_final_counters() {
    init_tracing();
    let (engine, mem) = mem_engine(2);
    mem.insert_file("/a", &[1u8; 100]).unwrap();
    mem.insert_file("/b", &[2u8; 50]).unwrap();

    let result = Arc::new(Mutex::new(None));
    let r = result.clone();
    engine
        .transfer(
            vec!["mem:/a".into(), "mem:/b".into()],
            vec!["mem:/a.copy".into(), "mem:/b.copy".into()],
            TransferOptions { remove_source: true, chunk_size: 32 },
            OverwriteMode::Abort,
            0,
            |_, _| ProgressAction::Continue,
            move |_, res| *r.lock() = Some(res),
        )
        .unwrap();
    engine
        .completions()
        .run_until(|| result.lock().is_some())
        .unwrap();
    let done = result.lock().take().unwrap().unwrap();
    assert_eq!(done.phase, TransferPhase::Completed);
    assert_eq!(done.total_bytes, 150);
    assert_eq!(done.total_bytes_copied, 150);
    assert_eq!(mem.contents("/a.copy").unwrap(), vec![1u8; 100]);
    assert!(mem.contents("/a").is_none());
}

#[test]
fn method_errors_pass_through_unchanged() {
    init_tracing();
    let (engine, _) = mem_engine(2);
    let result = Arc::new(Mutex::new(None));
    let r = result.clone();
    engine
        .open("mem:/missing", OpenMode::READ, move |_, res| *r.lock() = Some(res.map(|_| ())))
        .unwrap();
    engine
        .completions()
        .run_until(|| result.lock().is_some())
        .unwrap();
    assert!(matches!(result.lock().take(), Some(Err(VfsError::NotFound(_)))));

    let infos = Arc::new(Mutex::new(None));
    let i = infos.clone();
    engine
        .get_file_info(
            vec!["mem:/".into(), "ftp://nowhere/x".into()],
            InfoOptions::default(),
            Vec::new(),
            move |_, res| *i.lock() = Some(res.unwrap()),
        )
        .unwrap();
    engine.completions().run_until(|| infos.lock().is_some()).unwrap();
    let infos = infos.lock().take().unwrap();
    assert!(infos[0].1.as_ref().unwrap().kind.is_dir());
    assert!(matches!(infos[1].1, Err(VfsError::UnknownScheme(_))));
}
