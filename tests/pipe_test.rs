//! Pipe backpressure, drain and finish semantics through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use tickloop::{
    Pipe, PipeConfig, PipeError, Record, Runtime, RuntimeConfig, Scheduler, SchedulerConfig,
    VirtualClock,
};

fn scheduler() -> Scheduler {
    Scheduler::with_clock(SchedulerConfig::default(), Arc::new(VirtualClock::new(0)))
}

#[test]
fn backpressure_signalled_at_high_water_mark_and_drained_once() {
    let sched = scheduler();
    let delivered = Rc::new(Cell::new(0));
    let d = delivered.clone();
    let pipe = Pipe::new(&sched, PipeConfig::new(3, 1), move |_: Record<u8>| {
        d.set(d.get() + 1)
    });

    let drains = Rc::new(RefCell::new(Vec::new()));
    let (dr, p, dl) = (drains.clone(), pipe.clone(), delivered.clone());
    pipe.on_drain(move || dr.borrow_mut().push((dl.get(), p.buffered_size())));

    let writes: Vec<bool> = (0..5).map(|n| pipe.write(Record(n)).unwrap()).collect();
    // false exactly when buffered size >= 3 at return time
    assert_eq!(writes, vec![true, true, false, false, false]);

    sched.run().unwrap();
    assert_eq!(delivered.get(), 5);
    // one pause episode, one drain: after four deliveries the buffer holds one chunk.
    // "Drain after three steps" only holds for four writes; five leave size 2 after three.
    assert_eq!(*drains.borrow(), vec![(4, 1)]);
}

#[test]
fn drain_fires_once_per_pause_episode() {
    let sched = scheduler();
    let pipe = Pipe::new(&sched, PipeConfig::new(2, 0), |_: Vec<u8>| {});
    let drains = Rc::new(Cell::new(0));
    let d = drains.clone();
    pipe.on_drain(move || d.set(d.get() + 1));

    // First episode.
    assert!(!pipe.write(vec![0; 2]).unwrap());
    // Second episode, started by a producer reacting to the first drain.
    let p = pipe.clone();
    sched
        .schedule_after(5, move || {
            assert!(!p.is_paused());
            assert!(!p.write(vec![0; 3]).unwrap());
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(drains.get(), 2);
}

#[test]
fn byte_chunks_count_their_length() {
    let sched = scheduler();
    let pipe = Pipe::new(&sched, PipeConfig::new(10, 4), |_: String| {});

    assert!(pipe.write("hello".to_string()).unwrap());
    assert!(!pipe.write("world".to_string()).unwrap());
    assert_eq!(pipe.buffered_size(), 10);
    assert_eq!(pipe.buffered_chunks(), 2);
    assert!(pipe.is_paused());
}

#[test]
fn end_delivers_remaining_then_finishes() {
    let sched = scheduler();
    let events = Rc::new(RefCell::new(Vec::new()));
    let e = events.clone();
    let pipe = Pipe::new(&sched, PipeConfig::records(), move |r: Record<&'static str>| {
        e.borrow_mut().push(r.0)
    });
    let e = events.clone();
    pipe.on_finish(move || e.borrow_mut().push("finish"));

    pipe.write(Record("a")).unwrap();
    pipe.write(Record("b")).unwrap();
    pipe.end().unwrap();
    assert_eq!(pipe.write(Record("c")).unwrap_err(), PipeError::WriteAfterEnd);
    assert!(events.borrow().is_empty());

    sched.run().unwrap();
    assert_eq!(*events.borrow(), vec!["a", "b", "finish"]);
    assert!(pipe.is_finished());
}

#[test]
fn malformed_chunk_does_not_halt_pipe() {
    let sched = scheduler();
    let parsed = Rc::new(RefCell::new(Vec::new()));
    let p = parsed.clone();
    let pipe = Pipe::new(&sched, PipeConfig::default(), move |line: String| {
        line.trim()
            .parse::<i64>()
            .map(|n| p.borrow_mut().push(n))
            .map_err(|e| format!("{line:?}: {e}"))
    });
    let errors = Rc::new(RefCell::new(Vec::new()));
    let e = errors.clone();
    pipe.on_error(move |err| e.borrow_mut().push(err.clone()));

    for line in ["1", "two", "3"] {
        pipe.write(line.to_string()).unwrap();
    }
    sched.run().unwrap();

    assert_eq!(*parsed.borrow(), vec![1, 3]);
    assert_eq!(errors.borrow().len(), 1);
    assert!(matches!(&errors.borrow()[0], PipeError::MalformedChunk(msg) if msg.starts_with("\"two\"")));
}

#[test]
fn panicking_error_listener_does_not_stop_finish() {
    let sched = scheduler();
    let delivered = Rc::new(RefCell::new(Vec::new()));
    let d = delivered.clone();
    let pipe = Pipe::new(&sched, PipeConfig::records(), move |r: Record<u32>| {
        if r.0 == 0 {
            return Err("zero record");
        }
        d.borrow_mut().push(r.0);
        Ok(())
    });
    pipe.on_error(|_| panic!("error listener failed"));
    let finished = Rc::new(Cell::new(0));
    let f = finished.clone();
    pipe.on_finish(move || f.set(f.get() + 1));

    for n in 0..3 {
        pipe.write(Record(n)).unwrap();
    }
    pipe.end().unwrap();
    sched.run().unwrap();

    assert_eq!(*delivered.borrow(), vec![1, 2]);
    assert!(pipe.is_finished());
    assert_eq!(finished.get(), 1);
}

#[test]
fn panicking_drain_listener_keeps_later_listeners() {
    let sched = scheduler();
    let pipe = Pipe::new(&sched, PipeConfig::new(2, 0), |_: Vec<u8>| {});
    pipe.on_drain(|| panic!("drain listener failed"));
    let drains = Rc::new(Cell::new(0));
    let d = drains.clone();
    pipe.on_drain(move || d.set(d.get() + 1));

    assert!(!pipe.write(vec![0; 2]).unwrap());
    let p = pipe.clone();
    sched
        .schedule_after(5, move || {
            assert!(!p.write(vec![0; 3]).unwrap());
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(drains.get(), 2);
}

#[test]
fn chained_pipes_respect_downstream_backpressure() {
    let sched = scheduler();
    let received = Rc::new(RefCell::new(Vec::new()));
    let r = received.clone();
    let sink = Pipe::new(&sched, PipeConfig::new(4, 1), move |chunk: Vec<u8>| {
        r.borrow_mut().push(chunk.len())
    });
    let source = Pipe::chain_map(&sched, PipeConfig::records(), &sink, |r: Record<usize>| {
        vec![0u8; r.0]
    });
    let finished = Rc::new(Cell::new(false));
    let f = finished.clone();
    sink.on_finish(move || f.set(true));

    for size in [3, 3, 3, 1] {
        source.write(Record(size)).unwrap();
    }
    source.end().unwrap();
    sched.run().unwrap();

    assert_eq!(*received.borrow(), vec![3, 3, 3, 1]);
    assert!(source.is_finished());
    assert!(finished.get());
}

#[test]
fn runtime_pipe_uses_configured_water_marks() {
    let config = RuntimeConfig { pipe: PipeConfig::new(2, 1), ..Default::default() };
    let runtime = Runtime::with_clock(config, Arc::new(VirtualClock::new(0)));
    let pipe = runtime.pipe(|_: Record<()>| {});

    assert!(pipe.write(Record(())).unwrap());
    assert!(!pipe.write(Record(())).unwrap());
    assert_eq!(pipe.config(), PipeConfig::new(2, 1));
    runtime.run().unwrap();
    assert_eq!(pipe.buffered_chunks(), 0);
}
