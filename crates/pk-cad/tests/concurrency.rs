//! Concurrent sessions sharing one build cache

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use glam::DVec3;
use pk_cad::{
    AnalyticKernel, BuildResult, ConstructContext, Engine, FeatureBuild, FeatureNode,
    FeatureOutput, FeatureRef,
};
use pk_core::{BuildCache, HashAccumulator, Origin, SessionConfig};

const THREADS: usize = 8;

/// Unit box that counts constructions and may rendezvous inside the build
#[derive(Debug)]
struct Counted {
    seed: i64,
    builds: Arc<AtomicUsize>,
    rendezvous: Option<Arc<Barrier>>,
}

impl FeatureBuild for Counted {
    fn kind(&self) -> &'static str {
        "Counted"
    }

    fn upstream(&self) -> &[FeatureRef] {
        &[]
    }

    fn hash_params(&self, acc: &mut HashAccumulator) {
        acc.combine(&self.seed);
    }

    fn construct(&self, ctx: &ConstructContext<'_>) -> BuildResult<FeatureOutput> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.rendezvous {
            barrier.wait();
        }
        let solid = ctx.kernel().create_box(DVec3::ZERO, DVec3::ONE)?;
        Ok(FeatureOutput::new(solid))
    }
}

fn engine() -> Engine {
    Engine::new(
        Arc::new(BuildCache::default()),
        Arc::new(AnalyticKernel::new()),
        SessionConfig::default(),
    )
}

#[test]
fn racing_sessions_build_once() {
    let engine = engine();
    let builds = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = engine.clone();
            let builds = Arc::clone(&builds);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                // Every session declares its own node for the same feature
                let node = FeatureNode::new(Counted {
                    seed: 42,
                    builds,
                    rendezvous: None,
                });
                let session = engine.begin_session();
                start.wait();
                let output = session.ensure_built(&node).unwrap();
                (output, node.origin())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    let built = results
        .iter()
        .filter(|(_, origin)| *origin == Some(Origin::Built))
        .count();
    assert_eq!(built, 1);
    assert!(results
        .iter()
        .all(|(output, _)| Arc::ptr_eq(output, &results[0].0)));

    let stats = engine.cache().stats();
    assert_eq!(stats.builds, 1);
    assert_eq!(stats.hits, (THREADS - 1) as u64);
    assert_eq!(engine.cache().len(), 1);
}

#[test]
fn shared_node_adopts_first_result() {
    let engine = engine();
    let builds = Arc::new(AtomicUsize::new(0));
    let node = FeatureNode::new(Counted {
        seed: 7,
        builds: Arc::clone(&builds),
        rendezvous: None,
    });

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = engine.clone();
            let node = Arc::clone(&node);
            thread::spawn(move || {
                let session = engine.begin_session();
                session.ensure_built(&node).unwrap()
            })
        })
        .collect();

    for handle in handles {
        let output = handle.join().unwrap();
        assert!(Arc::ptr_eq(&output, &node.output().unwrap()));
    }
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(node.origin(), Some(Origin::Built));
}

#[test]
fn different_hashes_build_in_parallel() {
    let engine = engine();
    let builds = Arc::new(AtomicUsize::new(0));
    // Both builders must be inside construction at the same time to pass
    let rendezvous = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|seed| {
            let engine = engine.clone();
            let node = FeatureNode::new(Counted {
                seed,
                builds: Arc::clone(&builds),
                rendezvous: Some(Arc::clone(&rendezvous)),
            });
            thread::spawn(move || {
                let session = engine.begin_session();
                session.ensure_built(&node).map(|_| ())
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert_eq!(builds.load(Ordering::SeqCst), 2);
    assert_eq!(engine.cache().len(), 2);
}
