//! Driving graphs with `Scheduler::iterate`.

use cochain::element::{Element, ElementContext, PadTemplate};
use cochain::elements::{AppSink, AppSinkHandle, Funnel, Identity, NullSink, Queue, Tee, TestSrc};
use cochain::item::{Buffer, Item};
use cochain::scheduler::{
    ChainState, ElementId, Graph, IterateState, PadId, Scheduler, SchedulerConfig,
};
use cochain::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

fn link(
    sched: &mut Scheduler,
    graph: &Graph,
    src: ElementId,
    src_pad: &str,
    sink: ElementId,
    sink_pad: &str,
) {
    sched
        .pad_connect(graph.pad(src, src_pad).unwrap(), graph.pad(sink, sink_pad).unwrap())
        .unwrap();
}

fn run_to_done(sched: &mut Scheduler) -> usize {
    let mut calls = 1;
    while sched.iterate().unwrap() != IterateState::Done {
        calls += 1;
        assert!(calls < 1000, "graph did not finish");
    }
    calls
}

fn add_sink(graph: &Graph, sched: &mut Scheduler, name: &str) -> (ElementId, AppSinkHandle) {
    let sink = AppSink::new();
    let handle = sink.handle();
    let id = graph.add_element(name, sink);
    sched.add_element(id).unwrap();
    (id, handle)
}

/// Pull source producing sequence numbers `next..end`.
struct Numbers {
    next: u64,
    end: u64,
}

impl Element for Numbers {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::src("src")]
    }

    fn produce_item(&mut self, _pad: PadId, _ctx: &mut ElementContext<'_>) -> Result<Option<Item>> {
        if self.next == self.end {
            return Ok(None);
        }
        self.next += 1;
        Ok(Some(Buffer::from_sequence(self.next - 1).into()))
    }
}

/// A source, a filter and a sink deliver every buffer and then end of
/// stream, after which iterate reports done.
#[test]
fn test_linear_graph_runs_to_eos() {
    let graph = Graph::new();
    let mut sched = Scheduler::new(&graph, SchedulerConfig::default());
    let src = graph.add_element("src", TestSrc::new().with_buffer_size(16).with_num_buffers(5));
    let identity = Identity::new();
    let stats = identity.stats_handle();
    let filter = graph.add_element("filter", identity);
    sched.add_element(src).unwrap();
    sched.add_element(filter).unwrap();
    let (sink, handle) = add_sink(&graph, &mut sched, "sink");
    link(&mut sched, &graph, src, "src", filter, "sink");
    link(&mut sched, &graph, filter, "src", sink, "sink");
    for e in [src, filter, sink] {
        sched.enable_element(e).unwrap();
    }

    run_to_done(&mut sched);

    assert_eq!(handle.sequences(), vec![0, 1, 2, 3, 4]);
    assert!(handle.is_eos());
    assert_eq!(stats.stats().buffer_count, 5);
    assert_eq!(stats.stats().byte_count, 80);
    for e in [src, filter, sink] {
        assert!(graph.is_eos(e).unwrap());
        assert!(!graph.is_enabled(e).unwrap());
    }
    assert!(sched.switches() > 0);
}

/// With unlimited iterations one call runs the graph to the end.
#[test]
fn test_run_to_completion_config() {
    let graph = Graph::new();
    let mut sched = Scheduler::new(&graph, SchedulerConfig::run_to_completion());
    let src = graph.add_element("src", Numbers { next: 0, end: 20 });
    sched.add_element(src).unwrap();
    let (sink, handle) = add_sink(&graph, &mut sched, "sink");
    link(&mut sched, &graph, src, "src", sink, "sink");
    sched.enable_element(src).unwrap();
    sched.enable_element(sink).unwrap();

    assert_eq!(sched.iterate().unwrap(), IterateState::Done);
    assert_eq!(handle.len(), 20);
    assert!(handle.is_eos());
}

/// Re-enabling a finished element clears its end-of-stream state.
#[test]
fn test_reenable_clears_eos() {
    let graph = Graph::new();
    let mut sched = Scheduler::new(&graph, SchedulerConfig::run_to_completion());
    let src = graph.add_element("src", Numbers { next: 0, end: 1 });
    sched.add_element(src).unwrap();
    let (sink, _handle) = add_sink(&graph, &mut sched, "sink");
    link(&mut sched, &graph, src, "src", sink, "sink");
    sched.enable_element(src).unwrap();
    sched.enable_element(sink).unwrap();
    sched.iterate().unwrap();
    assert!(graph.is_eos(sink).unwrap());

    sched.enable_element(sink).unwrap();
    assert!(!graph.is_eos(sink).unwrap());
    assert!(graph.is_enabled(sink).unwrap());
}

/// Sink that interrupts after its first buffer.
struct Interrupter {
    seen: Arc<AtomicU64>,
}

impl Element for Interrupter {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::sink("sink")]
    }

    fn handle_item(&mut self, _pad: PadId, item: Item, ctx: &mut ElementContext<'_>) -> Result<()> {
        if item.as_buffer().is_some() && self.seen.fetch_add(1, Ordering::SeqCst) == 0 {
            ctx.interrupt()?;
        }
        Ok(())
    }
}

/// An interrupted sweep resumes with the chains it had not reached yet.
#[test]
fn test_interrupt_resumes_sweep() {
    let graph = Graph::new();
    let mut sched = Scheduler::new(&graph, SchedulerConfig::default());
    let a_seen = Arc::new(AtomicU64::new(0));
    let src_a = graph.add_element("src-a", Numbers { next: 0, end: 10 });
    let sink_a = graph.add_element("sink-a", Interrupter { seen: Arc::clone(&a_seen) });
    sched.add_element(src_a).unwrap();
    sched.add_element(sink_a).unwrap();
    link(&mut sched, &graph, src_a, "src", sink_a, "sink");

    let src_b = graph.add_element("src-b", Numbers { next: 0, end: 10 });
    sched.add_element(src_b).unwrap();
    let (sink_b, handle_b) = add_sink(&graph, &mut sched, "sink-b");
    link(&mut sched, &graph, src_b, "src", sink_b, "sink");
    for e in [src_a, sink_a, src_b, sink_b] {
        sched.enable_element(e).unwrap();
    }
    assert_eq!(sched.chains().len(), 2);

    assert_eq!(sched.iterate().unwrap(), IterateState::Interrupted);
    assert_eq!(a_seen.load(Ordering::SeqCst), 1);
    assert_eq!(handle_b.len(), 0);

    // Only chain b is left in this sweep.
    assert_eq!(sched.iterate().unwrap(), IterateState::More);
    assert_eq!(a_seen.load(Ordering::SeqCst), 1);
    assert_eq!(handle_b.len(), 1);

    // A fresh sweep visits both again. Chain a first lets its source finish
    // the push that was interrupted, so new data shows up one sweep later.
    assert_eq!(sched.iterate().unwrap(), IterateState::More);
    assert_eq!(a_seen.load(Ordering::SeqCst), 1);
    assert_eq!(handle_b.len(), 2);
    assert_eq!(sched.iterate().unwrap(), IterateState::More);
    assert_eq!(a_seen.load(Ordering::SeqCst), 2);
    assert_eq!(handle_b.len(), 3);
}

/// A pending state change makes iterate report an interruption until it is
/// cleared.
#[test]
fn test_state_change_handle_interrupts() {
    let graph = Graph::new();
    let mut sched = Scheduler::new(&graph, SchedulerConfig::default());
    let src = graph.add_element("src", Numbers { next: 0, end: 3 });
    sched.add_element(src).unwrap();
    let (sink, handle) = add_sink(&graph, &mut sched, "sink");
    link(&mut sched, &graph, src, "src", sink, "sink");
    sched.enable_element(src).unwrap();
    sched.enable_element(sink).unwrap();

    let pending = sched.state_change_handle();
    let remote = pending.clone();
    std::thread::spawn(move || remote.request()).join().unwrap();

    assert_eq!(sched.iterate().unwrap(), IterateState::Interrupted);
    assert_eq!(sched.iterate().unwrap(), IterateState::Interrupted);
    assert!(handle.is_empty());

    pending.clear();
    assert_eq!(sched.iterate().unwrap(), IterateState::More);
    assert_eq!(handle.len(), 1);
}

/// Source that fails on its third buffer.
struct Faulty {
    produced: u64,
}

impl Element for Faulty {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::src("src")]
    }

    fn produce_item(&mut self, _pad: PadId, _ctx: &mut ElementContext<'_>) -> Result<Option<Item>> {
        if self.produced == 2 {
            return Err(Error::Flow("sensor unplugged".into()));
        }
        self.produced += 1;
        Ok(Some(Buffer::from_sequence(self.produced).into()))
    }
}

/// An element error aborts iterate with the element named, and the failed
/// element stays disabled.
#[test]
fn test_element_error_propagates() {
    let graph = Graph::new();
    let mut sched = Scheduler::new(&graph, SchedulerConfig::run_to_completion());
    let src = graph.add_element("camera", Faulty { produced: 0 });
    sched.add_element(src).unwrap();
    let (sink, handle) = add_sink(&graph, &mut sched, "sink");
    link(&mut sched, &graph, src, "src", sink, "sink");
    sched.enable_element(src).unwrap();
    sched.enable_element(sink).unwrap();

    let err = sched.iterate().unwrap_err();
    match &err {
        Error::Element { element, source } => {
            assert_eq!(element, "camera");
            assert!(matches!(**source, Error::Flow(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(handle.len(), 2);
    assert!(!graph.is_enabled(src).unwrap());
    assert!(!handle.is_eos());
}

/// Wiring that needs more cothreads than allowed fails and leaves the chain
/// unwired with nothing allocated.
#[test]
fn test_cothread_limit() {
    let graph = Graph::new();
    let mut sched = Scheduler::new(&graph, SchedulerConfig::default().with_max_cothreads(1));
    let src = graph.add_element("src", Numbers { next: 0, end: 3 });
    sched.add_element(src).unwrap();
    let (sink, _handle) = add_sink(&graph, &mut sched, "sink");
    link(&mut sched, &graph, src, "src", sink, "sink");

    let err = sched.enable_element(src).unwrap_err();
    assert!(matches!(err, Error::CothreadsExhausted { max: 1 }));
    assert_eq!(sched.cothreads(), 0);
    assert!(!graph.is_enabled(src).unwrap());
    assert_eq!(sched.chains()[0].state, ChainState::Unwired);
    assert!(!graph.has_cothread(src).unwrap());
}

/// A funnel waits on all of its inputs and forwards whatever arrives,
/// keeping each input's order.
#[test]
fn test_funnel_merges_inputs() {
    let graph = Graph::new();
    let mut sched = Scheduler::new(&graph, SchedulerConfig::default());
    let low = graph.add_element("low", Numbers { next: 0, end: 4 });
    let high = graph.add_element("high", Numbers { next: 100, end: 103 });
    let funnel = graph.add_element("funnel", Funnel::new());
    let in0 = Funnel::request_pad(&graph, funnel).unwrap();
    let in1 = Funnel::request_pad(&graph, funnel).unwrap();
    for e in [low, high, funnel] {
        sched.add_element(e).unwrap();
    }
    let (sink, handle) = add_sink(&graph, &mut sched, "sink");
    sched.pad_connect(graph.pad(low, "src").unwrap(), in0).unwrap();
    sched.pad_connect(graph.pad(high, "src").unwrap(), in1).unwrap();
    link(&mut sched, &graph, funnel, "src", sink, "sink");
    for e in [low, high, funnel, sink] {
        sched.enable_element(e).unwrap();
    }
    assert_eq!(sched.chains().len(), 1);

    run_to_done(&mut sched);

    let seqs = handle.sequences();
    assert_eq!(seqs.len(), 7);
    let lows: Vec<u64> = seqs.iter().copied().filter(|s| *s < 100).collect();
    let highs: Vec<u64> = seqs.iter().copied().filter(|s| *s >= 100).collect();
    assert_eq!(lows, vec![0, 1, 2, 3]);
    assert_eq!(highs, vec![100, 101, 102]);
    assert!(handle.is_eos());
    assert!(graph.is_eos(funnel).unwrap());
}

/// A tee copies every buffer to each of its outputs.
#[test]
fn test_tee_fans_out() {
    let graph = Graph::new();
    let mut sched = Scheduler::new(&graph, SchedulerConfig::default());
    let src = graph.add_element("src", Numbers { next: 0, end: 3 });
    let tee = graph.add_element("tee", Tee::new());
    let out0 = Tee::request_pad(&graph, tee).unwrap();
    let out1 = Tee::request_pad(&graph, tee).unwrap();
    sched.add_element(src).unwrap();
    sched.add_element(tee).unwrap();
    let (left, left_handle) = add_sink(&graph, &mut sched, "left");
    let (right, right_handle) = add_sink(&graph, &mut sched, "right");
    link(&mut sched, &graph, src, "src", tee, "sink");
    sched.pad_connect(out0, graph.pad(left, "sink").unwrap()).unwrap();
    sched.pad_connect(out1, graph.pad(right, "sink").unwrap()).unwrap();
    for e in [src, tee, left, right] {
        sched.enable_element(e).unwrap();
    }

    run_to_done(&mut sched);

    assert_eq!(left_handle.sequences(), vec![0, 1, 2]);
    assert_eq!(right_handle.sequences(), vec![0, 1, 2]);
    assert!(left_handle.is_eos() && right_handle.is_eos());
}

/// A queue splits the graph into two chains that hand data over through
/// direct calls.
#[test]
fn test_queue_boundary() {
    let graph = Graph::new();
    let mut sched = Scheduler::new(&graph, SchedulerConfig::default());
    let src = graph.add_element("src", Numbers { next: 0, end: 6 });
    let queue = Queue::new(16);
    let stats = queue.stats_handle();
    let queue = graph.add_element("queue", queue);
    sched.add_element(src).unwrap();
    sched.add_element(queue).unwrap();
    let (sink, handle) = add_sink(&graph, &mut sched, "sink");
    link(&mut sched, &graph, src, "src", queue, "sink");
    link(&mut sched, &graph, queue, "src", sink, "sink");
    for e in [src, queue, sink] {
        sched.enable_element(e).unwrap();
    }
    assert_eq!(sched.chains().len(), 2);
    assert!(!graph.has_cothread(queue).unwrap());

    run_to_done(&mut sched);

    assert_eq!(handle.sequences(), vec![0, 1, 2, 3, 4, 5]);
    assert!(handle.is_eos());
    // Six buffers and end of stream went through.
    assert_eq!(stats.stats().total_popped, 7);
    assert_eq!(stats.stats().current_items, 0);
}

/// A link to an element of another scheduler is a direct call.
#[test]
fn test_cross_scheduler_link_is_direct() {
    let graph = Graph::new();
    let mut upstream = Scheduler::new(&graph, SchedulerConfig::default().with_name("up"));
    let mut downstream = Scheduler::new(&graph, SchedulerConfig::default().with_name("down"));
    let src = graph.add_element("src", Numbers { next: 0, end: 3 });
    upstream.add_element(src).unwrap();
    let (sink, handle) = add_sink(&graph, &mut downstream, "sink");
    link(&mut upstream, &graph, src, "src", sink, "sink");
    upstream.enable_element(src).unwrap();

    run_to_done(&mut upstream);

    assert_eq!(handle.sequences(), vec![0, 1, 2]);
    assert!(handle.is_eos());
    assert!(graph.is_eos(sink).unwrap());
    assert_eq!(downstream.cothreads(), 0);
}

/// Elements flagged as unfit entries are never picked to start a chain.
#[test]
fn test_no_entry_flag() {
    use cochain::element::ElementFlags;

    struct Passive;

    impl Element for Passive {
        fn pad_templates(&self) -> Vec<PadTemplate> {
            vec![PadTemplate::src("src")]
        }

        fn flags(&self) -> ElementFlags {
            ElementFlags::NO_ENTRY
        }

        fn produce_item(&mut self, _pad: PadId, _ctx: &mut ElementContext<'_>) -> Result<Option<Item>> {
            Ok(Some(Buffer::from_sequence(0).into()))
        }
    }

    let graph = Graph::new();
    let mut sched = Scheduler::new(&graph, SchedulerConfig::default());
    let passive = graph.add_element("passive", Passive);
    sched.add_element(passive).unwrap();
    let sink = graph.add_element("sink", NullSink::new());
    sched.add_element(sink).unwrap();
    link(&mut sched, &graph, passive, "src", sink, "sink");
    sched.enable_element(passive).unwrap();

    assert_eq!(sched.iterate().unwrap(), IterateState::Done);
    assert_eq!(sched.chains()[0].entry, None);
}

/// Source whose device driver panics.
struct Exploding;

impl Element for Exploding {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::src("src")]
    }

    fn produce_item(&mut self, _pad: PadId, _ctx: &mut ElementContext<'_>) -> Result<Option<Item>> {
        panic!("camera exploded");
    }
}

/// A panic inside an element is reported as that element's failure.
#[test]
fn test_element_panic_fails_element() {
    let graph = Graph::new();
    let mut sched = Scheduler::new(&graph, SchedulerConfig::default());
    let src = graph.add_element("camera", Exploding);
    sched.add_element(src).unwrap();
    let sink = graph.add_element("sink", NullSink::new());
    sched.add_element(sink).unwrap();
    link(&mut sched, &graph, src, "src", sink, "sink");
    sched.enable_element(src).unwrap();
    sched.enable_element(sink).unwrap();

    let err = sched.iterate().unwrap_err();
    match &err {
        Error::Element { element, source } => {
            assert_eq!(element, "camera");
            assert!(matches!(&**source, Error::Panicked(msg) if msg.contains("camera exploded")));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!graph.is_enabled(src).unwrap());
}

/// A filter owned by one scheduler, fed by a source of another, completes
/// when both schedulers are iterated in turn.
#[test]
fn test_two_schedulers_alternate() {
    let graph = Graph::new();
    let mut upstream = Scheduler::new(&graph, SchedulerConfig::default().with_name("up"));
    let mut downstream = Scheduler::new(&graph, SchedulerConfig::default().with_name("down"));
    let src = graph.add_element("src", Numbers { next: 0, end: 3 });
    upstream.add_element(src).unwrap();
    let filter = graph.add_element("filter", Identity::new());
    downstream.add_element(filter).unwrap();
    let (sink, handle) = add_sink(&graph, &mut downstream, "sink");
    link(&mut upstream, &graph, src, "src", filter, "sink");
    link(&mut downstream, &graph, filter, "src", sink, "sink");

    upstream.enable_element(src).unwrap();
    downstream.enable_element(sink).unwrap();
    downstream.enable_element(filter).unwrap();

    let mut rounds = 0;
    loop {
        let down = downstream.iterate().unwrap();
        let up = upstream.iterate().unwrap();
        if down == IterateState::Done && up == IterateState::Done {
            break;
        }
        rounds += 1;
        assert!(rounds < 100, "schedulers did not finish");
    }

    assert_eq!(handle.sequences(), vec![0, 1, 2]);
    assert!(handle.is_eos());
    assert!(graph.is_eos(filter).unwrap());
}
