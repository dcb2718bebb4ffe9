//! Property-style scenario: a pseudo-random, but fully reproducible, object graph built and
//! repeatedly mutated across several evacuating collections, checking the same invariants the
//! literal scenarios in `gc_scenarios.rs` check by hand - no root ever dangles, and no live
//! object's range ever overlaps another's - against shapes a hand-written test wouldn't think
//! to try.
//!
//! Grounded on `examples/mmtk-mmtk-core/benches/bulk_meta/bscan.rs`'s `get_rng`: a fixed-seed
//! `ChaCha8Rng`, not secure, but completely deterministic and reproducible across runs.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rcimmixcons::{Address, Collector, Options, Rtti};

const SEED64: u64 = 0x4050cb1b5ab26c70;

fn get_rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(SEED64)
}

fn small_heap() -> Options {
    let mut options = Options::new_no_env_vars();
    options.initial_heap_blocks = 4;
    options.max_heap_blocks = 256;
    options.evacuation_candidate_fraction = 0.5;
    options
}

fn leaked_rtti(num_members: usize) -> &'static Rtti {
    let object_size = std::mem::size_of::<rcimmixcons::ObjectHeader>()
        + num_members.max(1) * std::mem::size_of::<usize>();
    Box::leak(Box::new(Rtti { object_size, num_members }))
}

/// A node's `rtti` carries 0..=3 member slots, chosen at random; the allocator therefore ends
/// up serving a genuine mix of word-sized and multi-line objects from the same blocks, which is
/// what actually produces the ragged holes an evacuating collection has to defragment.
fn random_rtti(rng: &mut impl Rng) -> &'static Rtti {
    static RTTIS: [std::sync::OnceLock<&'static Rtti>; 4] = [
        std::sync::OnceLock::new(),
        std::sync::OnceLock::new(),
        std::sync::OnceLock::new(),
        std::sync::OnceLock::new(),
    ];
    let members = rng.random_range(0..RTTIS.len());
    *RTTIS[members].get_or_init(|| leaked_rtti(members))
}

#[test]
fn randomized_graph_survives_repeated_evacuating_collections() {
    let mut rng = get_rng();
    let mut collector = Collector::create_with_options(small_heap()).expect("create succeeds");

    let mut roots: Vec<usize> = Vec::new();
    let mut live = Vec::new();

    for round in 0..12 {
        // Grow the graph: a batch of new nodes, each either rooted directly or hung off a
        // member slot of a node already known to be live, so the graph accumulates real
        // internal references alongside the root set instead of just a flat array of roots.
        for _ in 0..30 {
            let rtti = random_rtti(&mut rng);
            let obj = collector.allocate(rtti).expect("allocation succeeds");
            if live.is_empty() || rng.random_bool(0.3) {
                let slot: &'static mut usize = Box::leak(Box::new(obj.to_address().as_usize()));
                collector.set_static_root(Address::from_mut_ptr(slot as *mut usize));
                roots.push(*slot);
            } else {
                let parent = live[rng.random_range(0..live.len())];
                let parent_members = parent.num_members();
                if parent_members > 0 {
                    collector.write_barrier(parent);
                    let slot_index = rng.random_range(0..parent_members);
                    parent.set_member(slot_index, Some(obj));
                }
            }
            live.push(obj);
        }

        // Mutate a handful of existing composite nodes under the write barrier, severing some
        // edges at random - exactly the kind of in-place rebinding sticky RC exists to reclaim
        // without a full trace, and what leaves fragmented holes for the tracer to find.
        for _ in 0..15 {
            if live.is_empty() {
                break;
            }
            let node = live[rng.random_range(0..live.len())];
            if node.num_members() == 0 {
                continue;
            }
            collector.write_barrier(node);
            let slot_index = rng.random_range(0..node.num_members());
            if rng.random_bool(0.5) {
                node.set_member(slot_index, None);
            } else {
                let replacement = live[rng.random_range(0..live.len())];
                node.set_member(slot_index, Some(replacement));
            }
        }

        let evacuate = round % 2 == 0;
        collector.collect(evacuate, true);

        // Every root must still resolve to a live object after the collection, regardless of
        // whether this round evacuated - a root is never a valid evacuation source itself (it
        // is pinned by `resolve_roots`), but its non-rooted descendants may well have moved,
        // and `find_object` must still chase a (possibly rewritten) root slot to a real object.
        for &root_addr in &roots {
            assert!(
                collector.find_object(Address::from_usize(root_addr)).is_some(),
                "root at {round} must survive its own collection"
            );
        }

        // No two live, block-resident or large objects may ever overlap in address range -
        // the same invariant `gc_scenarios.rs`'s large/small scenario checks, just exercised
        // here against whatever ragged set of sizes this round's random graph produced.
        let mut ranges: Vec<(usize, usize)> = roots
            .iter()
            .filter_map(|&addr| collector.find_object(Address::from_usize(addr)))
            .map(|obj| {
                let start = obj.to_address().as_usize();
                (start, start + obj.object_size())
            })
            .collect();
        ranges.sort_unstable();
        for window in ranges.windows(2) {
            let (_, prev_end) = window[0];
            let (next_start, _) = window[1];
            assert!(prev_end <= next_start, "live object ranges must never overlap");
        }

        assert!(
            collector.live_block_count() <= small_heap().max_heap_blocks,
            "an evacuating collector must never exceed its configured heap ceiling"
        );
    }
}
