//! vjob End-to-End Smoke Test
//!
//! Drives a real engine through every operation:
//!   Part A: Lifecycle: start, double start, limits
//!   Part B: mem: backend: create, write, open, read, close, stat
//!   Part C: file: backend in a temp dir, through the worker pool
//!   Part D: Directory listing and transfer with progress
//!   Part E: Cancellation and shutdown drain
//!
//! Run: ./target/release/vjob-smoke
//! (RUST_LOG=vjob_runtime=debug for engine logs)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use vjob::{
    DirFilter, Engine, EngineConfig, EngineError, EngineState, FileHandle, FileInfo, InfoOptions,
    LocalMethod, MemoryMethod, MethodTable, OpenMode, OverwriteMode, ProgressAction, SortKey,
    SortRule, Target, TransferOptions, TransferPhase, TransferProgress, VfsError, VfsResult,
};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

/// Slot a callback fills in; the loop pumps until it is set.
type Slot<T> = Arc<Mutex<Option<T>>>;

fn slot<T>() -> Slot<T> {
    Arc::new(Mutex::new(None))
}

fn fill<T: Send + 'static>(s: &Slot<T>) -> impl FnOnce(vjob::JobHandle, T) + Send + 'static {
    let s = s.clone();
    move |_, v| *s.lock() = Some(v)
}

/// Dispatch completions until `s` is filled or 5s pass.
fn await_slot<T>(engine: &Engine, s: &Slot<T>) -> Option<T> {
    let completions = engine.completions();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(v) = s.lock().take() {
            return Some(v);
        }
        if completions.poll(Some(Duration::from_millis(10))).is_err() {
            break;
        }
    }
    s.lock().take()
}

fn config() -> EngineConfig {
    EngineConfig::from_env()
        .concurrency_limit(4)
        .drain_poll_interval(Duration::from_millis(5))
}

// ════════════════════════════════════════════════════════════
// Part A: Lifecycle
// ════════════════════════════════════════════════════════════

fn test_lifecycle(t: &mut TestRunner, table: Arc<MethodTable>) -> Option<Engine> {
    t.section("Part A: Lifecycle");

    let engine = match Engine::new(config(), table) {
        Ok(e) => { t.pass("Engine::new"); e }
        Err(e) => { t.fail("Engine::new", &e.to_string()); return None; }
    };
    t.check(
        "state before start: Uninitialized",
        engine.state() == EngineState::Uninitialized,
        &format!("{:?}", engine.state()),
    );

    let early = engine.submit(vjob::Request::load_directory("mem:/"), |_, _| {});
    t.check(
        "submit before start -> NotStarted",
        matches!(early, Err(EngineError::NotStarted)),
        &format!("{:?}", early.err()),
    );

    let started = engine.start();
    t.check("start", started.is_ok(), &format!("{:?}", started.err()));
    let again = engine.start();
    t.check(
        "second start -> AlreadyStarted",
        matches!(again, Err(EngineError::AlreadyStarted(_))),
        &format!("{:?}", again.err()),
    );

    let low = engine.set_concurrency_limit(1);
    t.check("limit 1 rejected", low.is_err(), "accepted");
    let raised = engine.set_concurrency_limit(6);
    t.check(
        &format!("limit raised to {}", engine.concurrency_limit()),
        raised.is_ok() && engine.concurrency_limit() == 6,
        &format!("{:?}", raised.err()),
    );

    Some(engine)
}

// ════════════════════════════════════════════════════════════
// Part B: mem: backend
// ════════════════════════════════════════════════════════════

fn test_memory(t: &mut TestRunner, engine: &Engine, mem: &MemoryMethod) {
    t.section("Part B: mem: Backend");

    let data = b"hello from the vjob smoke test!\n";
    let _ = mem.create_dir_all("/smoke");

    // B1: create + write + close
    let created: Slot<VfsResult<FileHandle>> = slot();
    let _ = engine.create("mem:/smoke/a.txt", OpenMode::WRITE, false, 0o644, fill(&created));
    let file = match await_slot(engine, &created) {
        Some(Ok(f)) => { t.pass("create mem:/smoke/a.txt"); f }
        other => { t.fail("create mem:/smoke/a.txt", &format!("{:?}", other)); return; }
    };

    let written: Slot<VfsResult<usize>> = slot();
    let _ = engine.write(&file, &data[..], fill(&written));
    let n = await_slot(engine, &written);
    t.check(
        &format!("write -> {:?} bytes", n.as_ref().and_then(|r| r.as_ref().ok())),
        matches!(n, Some(Ok(len)) if len == data.len()),
        &format!("expected {}", data.len()),
    );
    close(t, engine, &file);

    // B2: open + read 16 + close
    let opened: Slot<VfsResult<FileHandle>> = slot();
    let _ = engine.open("mem:/smoke/a.txt", OpenMode::READ, fill(&opened));
    let file = match await_slot(engine, &opened) {
        Some(Ok(f)) => { t.pass("open mem:/smoke/a.txt"); f }
        other => { t.fail("open mem:/smoke/a.txt", &format!("{:?}", other)); return; }
    };
    let read: Slot<VfsResult<Vec<u8>>> = slot();
    let _ = engine.read(&file, 16, fill(&read));
    let got = await_slot(engine, &read);
    t.check(
        "read 16 bytes, content matches",
        matches!(&got, Some(Ok(buf)) if buf[..] == data[..16]),
        &format!("{:?}", got),
    );
    close(t, engine, &file);

    let second: Slot<VfsResult<()>> = slot();
    let _ = engine.close(&file, fill(&second));
    t.check(
        "second close -> InvalidHandle",
        matches!(await_slot(engine, &second), Some(Err(VfsError::InvalidHandle))),
        "closed twice",
    );

    // B3: stat
    let info: Slot<VfsResult<Vec<(Target, VfsResult<FileInfo>)>>> = slot();
    let _ = engine.get_file_info(
        vec!["mem:/smoke/a.txt".into(), "mem:/smoke/missing".into()],
        InfoOptions::default(),
        vec!["path".into()],
        fill(&info),
    );
    match await_slot(engine, &info) {
        Some(Ok(infos)) => {
            let size_ok = matches!(&infos[0].1, Ok(i) if i.size == data.len() as u64);
            t.check("get_file_info size", size_ok, &format!("{:?}", infos[0].1));
            t.check(
                "get_file_info missing -> NotFound",
                matches!(infos[1].1, Err(VfsError::NotFound(_))),
                &format!("{:?}", infos[1].1),
            );
        }
        other => t.fail("get_file_info", &format!("{:?}", other)),
    }
    t.check("backend sees the file", mem.exists("/smoke/a.txt"), "missing");
}

fn close(t: &mut TestRunner, engine: &Engine, file: &FileHandle) {
    let closed: Slot<VfsResult<()>> = slot();
    let _ = engine.close(file, fill(&closed));
    let res = await_slot(engine, &closed);
    t.check(
        &format!("close {}", file.target()),
        matches!(res, Some(Ok(()))),
        &format!("{:?}", res),
    );
}

// ════════════════════════════════════════════════════════════
// Part C: file: backend
// ════════════════════════════════════════════════════════════

fn test_local(t: &mut TestRunner, engine: &Engine, dir: &std::path::Path) {
    t.section("Part C: file: Backend");

    let path = dir.join("local.txt");
    let target = format!("file://{}", path.display());
    let data = b"written through a worker thread\n";

    let created: Slot<VfsResult<FileHandle>> = slot();
    let _ = engine.create(target.as_str(), OpenMode::WRITE, true, 0o600, fill(&created));
    let file = match await_slot(engine, &created) {
        Some(Ok(f)) => { t.pass("create (exclusive)"); f }
        other => { t.fail("create (exclusive)", &format!("{:?}", other)); return; }
    };
    let written: Slot<VfsResult<usize>> = slot();
    let _ = engine.write(&file, &data[..], fill(&written));
    t.check(
        "write",
        matches!(await_slot(engine, &written), Some(Ok(n)) if n == data.len()),
        "short write",
    );
    close(t, engine, &file);

    let on_disk = std::fs::read(&path).unwrap_or_default();
    t.check("on-disk content matches", on_disk == data, &format!("{} bytes", on_disk.len()));

    let again: Slot<VfsResult<FileHandle>> = slot();
    let _ = engine.create(target.as_str(), OpenMode::WRITE, true, 0o600, fill(&again));
    t.check(
        "exclusive create again -> AlreadyExists",
        matches!(await_slot(engine, &again), Some(Err(VfsError::AlreadyExists(_)))),
        "second create succeeded",
    );

    let opened: Slot<VfsResult<FileHandle>> = slot();
    let _ = engine.open(target.as_str(), OpenMode::READ, fill(&opened));
    if let Some(Ok(file)) = await_slot(engine, &opened) {
        let read: Slot<VfsResult<Vec<u8>>> = slot();
        let _ = engine.read(&file, 4096, fill(&read));
        t.check(
            "read back",
            matches!(await_slot(engine, &read), Some(Ok(buf)) if buf == data),
            "mismatch",
        );
        close(t, engine, &file);
    } else {
        t.fail("open for read", "open failed");
    }
}

// ════════════════════════════════════════════════════════════
// Part D: Listing and transfer
// ════════════════════════════════════════════════════════════

fn test_listing_transfer(t: &mut TestRunner, engine: &Engine, mem: &MemoryMethod) {
    t.section("Part D: Directory Listing + Transfer");

    for i in 0..40 {
        let _ = mem.insert_file(&format!("/tree/f{i:02}"), &vec![b'x'; i * 10]);
    }
    let _ = mem.insert_file("/tree/.hidden", b"");
    let _ = mem.create_dir_all("/tree/sub");
    let _ = mem.create_dir_all("/copy");

    let batches = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(Mutex::new(Vec::new()));
    let (b, e) = (batches.clone(), entries.clone());
    let total: Slot<VfsResult<usize>> = slot();
    let _ = engine.load_directory(
        "mem:/tree",
        InfoOptions::default(),
        vec![SortRule::ascending(SortKey::DirectoriesFirst), SortRule::ascending(SortKey::Name)],
        Some(DirFilter::no_hidden()),
        16,
        move |_, batch| {
            b.fetch_add(1, Ordering::SeqCst);
            e.lock().extend(batch.into_iter().map(|i| i.name));
        },
        fill(&total),
    );
    let total = await_slot(engine, &total);
    t.check(
        &format!("load_directory -> {:?} entries", total.as_ref().and_then(|r| r.as_ref().ok())),
        matches!(total, Some(Ok(41))),
        "expected 41 (hidden filtered)",
    );
    t.check(
        &format!("delivered in {} batches", batches.load(Ordering::SeqCst)),
        batches.load(Ordering::SeqCst) >= 2,
        "single batch",
    );
    let names = entries.lock().clone();
    t.check(
        "directories first, then by name",
        names.first().map(String::as_str) == Some("sub")
            && names.get(1).map(String::as_str) == Some("f00"),
        &format!("{:?}", names.iter().take(3).collect::<Vec<_>>()),
    );

    // D2: transfer with progress
    let phases = Arc::new(Mutex::new(Vec::new()));
    let p = phases.clone();
    let done: Slot<VfsResult<TransferProgress>> = slot();
    let _ = engine.transfer(
        vec!["mem:/tree/f39".into(), "mem:/tree/f20".into()],
        vec!["mem:/copy/f39".into(), "mem:/copy/f20".into()],
        TransferOptions { remove_source: false, chunk_size: 32 },
        OverwriteMode::Abort,
        2,
        move |_, progress| {
            p.lock().push(progress.phase);
            ProgressAction::Continue
        },
        fill(&done),
    );
    match await_slot(engine, &done) {
        Some(Ok(progress)) => {
            t.check(
                &format!("transfer {} bytes", progress.total_bytes_copied),
                progress.phase == TransferPhase::Completed && progress.total_bytes_copied == 590,
                &format!("{:?}", progress),
            );
        }
        other => t.fail("transfer", &format!("{:?}", other)),
    }
    let seen = phases.lock().clone();
    t.check(
        "progress: collecting, copying, completed",
        seen.first() == Some(&TransferPhase::Collecting)
            && seen.contains(&TransferPhase::Copying)
            && seen.last() == Some(&TransferPhase::Completed),
        &format!("{:?}", seen),
    );
    t.check(
        "copy content matches",
        mem.contents("/copy/f39") == mem.contents("/tree/f39"),
        "mismatch",
    );

    // D3: overwrite policy
    let skipped: Slot<VfsResult<TransferProgress>> = slot();
    let _ = engine.transfer(
        vec!["mem:/tree/f01".into()],
        vec!["mem:/copy/f39".into()],
        TransferOptions::default(),
        OverwriteMode::Skip,
        0,
        |_, _| ProgressAction::Continue,
        fill(&skipped),
    );
    t.check(
        "existing destination skipped",
        matches!(await_slot(engine, &skipped), Some(Ok(p)) if p.files_skipped == 1),
        "not skipped",
    );
}

// ════════════════════════════════════════════════════════════
// Part E: Cancellation + shutdown
// ════════════════════════════════════════════════════════════

fn test_cancel_shutdown(t: &mut TestRunner, engine: &Engine, mem: &MemoryMethod) {
    t.section("Part E: Cancellation + Shutdown");

    let _ = mem.insert_file("/big", &vec![7u8; 4 << 20]);
    let done: Slot<VfsResult<TransferProgress>> = slot();
    let handle = engine.transfer(
        vec!["mem:/big".into()],
        vec!["mem:/big.copy".into()],
        TransferOptions { remove_source: false, chunk_size: 64 },
        OverwriteMode::Replace,
        0,
        |_, _| ProgressAction::Continue,
        fill(&done),
    );
    let handle = match handle {
        Ok(h) => h,
        Err(e) => { t.fail("submit long transfer", &e.to_string()); return; }
    };
    let first = engine.cancel(handle);
    let second = engine.cancel(handle);
    t.check("cancel twice -> Ok", first.is_ok() && second.is_ok(), "cancel failed");
    t.check(
        "cancelled transfer completes with Cancelled",
        matches!(await_slot(engine, &done), Some(Err(VfsError::Cancelled))),
        "not cancelled",
    );
    let after = engine.cancel(handle);
    t.check(
        "cancel after completion -> NotFound",
        matches!(after, Err(EngineError::NotFound(_))),
        &format!("{:?}", after),
    );

    let fired = Arc::new(AtomicUsize::new(0));
    for i in 0..32 {
        let f = fired.clone();
        let _ = engine.get_file_info(
            vec![format!("mem:/tree/f{:02}", i).into()],
            InfoOptions::default(),
            Vec::new(),
            move |_, _| { f.fetch_add(1, Ordering::SeqCst); },
        );
    }
    let state = engine.shutdown();
    t.check("shutdown -> Stopped", state == EngineState::Stopped, &format!("{:?}", state));
    t.check(
        &format!("drain delivered {}/32 callbacks", fired.load(Ordering::SeqCst)),
        fired.load(Ordering::SeqCst) == 32,
        "lost callbacks",
    );
    t.check("no outstanding jobs", engine.outstanding() == 0, "jobs left");
    let late = engine.submit(vjob::Request::load_directory("mem:/"), |_, _| {});
    t.check(
        "submit after shutdown -> Stopped",
        matches!(late, Err(EngineError::Stopped)),
        &format!("{:?}", late.err()),
    );
    t.check("second shutdown is a no-op", engine.shutdown() == EngineState::Stopped, "changed");
}

// ════════════════════════════════════════════════════════════

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    println!("=== vjob End-to-End Smoke Test ===");

    let mut t = TestRunner::new();

    let mem = Arc::new(MemoryMethod::new());
    let table = Arc::new(
        MethodTable::new()
            .with("mem", mem.clone())
            .with("file", Arc::new(LocalMethod::new())),
    );

    let engine = match test_lifecycle(&mut t, table) {
        Some(e) => e,
        None => {
            t.summary();
            std::process::exit(1);
        }
    };

    let tmp = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => {
            println!("\nFATAL: tempdir failed: {}", e);
            t.summary();
            std::process::exit(1);
        }
    };

    test_memory(&mut t, &engine, &mem);
    test_local(&mut t, &engine, tmp.path());
    test_listing_transfer(&mut t, &engine, &mem);
    test_cancel_shutdown(&mut t, &engine, &mem);

    drop(engine);
    tracing::info!(passed = t.passed, failed = t.failed, "smoke run finished");
    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
