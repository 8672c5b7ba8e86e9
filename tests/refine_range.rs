//! Refined range search: membership is the base index's decision, only
//! the reported distances are re-scored.

use juxta::codec::sq::ScalarQuantizer;
use juxta::eval::{range_pr, SyntheticDataset};
use juxta::{CodesIndex, Error, FlatIndex, Index, Metric, RefineIndex};

const RADIUS: f32 = 2.5;

fn dataset() -> SyntheticDataset {
    SyntheticDataset::new(32, 1024, 512, 256, 404)
}

fn quantized_base(ds: &SyntheticDataset) -> CodesIndex<ScalarQuantizer> {
    let sq = ScalarQuantizer::new(32, 4).unwrap();
    let mut base = CodesIndex::new(sq, Metric::L2);
    base.train(ds.train(), ds.nt()).unwrap();
    base.add(ds.database(), ds.nb()).unwrap();
    base
}

#[test]
fn refinement_keeps_base_memberships() {
    let ds = dataset();
    let base = quantized_base(&ds);
    let base_result = base.range_search(ds.queries(), ds.nq(), RADIUS, None).unwrap();

    let mut flat = FlatIndex::new(32, Metric::L2);
    flat.add(ds.database(), ds.nb()).unwrap();
    let index = RefineIndex::new(base, flat).unwrap();
    let refined = index.range_search(ds.queries(), ds.nq(), RADIUS, None).unwrap();

    assert_eq!(refined.lims, base_result.lims);
    assert_eq!(refined.ids, base_result.ids);
    assert!(
        base_result.len() > 0,
        "radius {RADIUS} admitted nothing, test is vacuous"
    );
}

#[test]
fn refined_distances_are_exact() {
    let ds = dataset();
    let base = quantized_base(&ds);

    let mut flat = FlatIndex::new(32, Metric::L2);
    flat.add(ds.database(), ds.nb()).unwrap();
    let index = RefineIndex::new(base, flat).unwrap();
    let refined = index.range_search(ds.queries(), ds.nq(), RADIUS, None).unwrap();

    for q in 0..ds.nq() {
        let (ids, dists) = refined.row(q);
        for (id, dist) in ids.iter().zip(dists.iter()) {
            let exact = Metric::L2.distance(ds.query_vector(q), ds.database_vector(*id as usize));
            assert!(
                (dist - exact).abs() <= 1e-4 * exact.max(1.0),
                "query {q} id {id}: refined {dist} vs exact {exact}"
            );
        }
    }
}

/// Recall against the exact reference is a property of the base's
/// admissions and must be untouched by refinement.
#[test]
fn refinement_does_not_change_recall() {
    let ds = dataset();
    let reference = ds
        .flat_reference(Metric::L2)
        .range_search(ds.queries(), ds.nq(), RADIUS, None)
        .unwrap();

    let base = quantized_base(&ds);
    let base_result = base.range_search(ds.queries(), ds.nq(), RADIUS, None).unwrap();

    let mut flat = FlatIndex::new(32, Metric::L2);
    flat.add(ds.database(), ds.nb()).unwrap();
    let index = RefineIndex::new(base, flat).unwrap();
    let refined = index.range_search(ds.queries(), ds.nq(), RADIUS, None).unwrap();

    let (_, base_recall) = range_pr(&reference, &base_result);
    let (_, refined_recall) = range_pr(&reference, &refined);
    assert_eq!(base_recall, refined_recall);
    assert!(base_recall > 0.5, "4-bit base lost most admissions");
}

#[test]
fn invalid_radius_is_rejected() {
    let ds = dataset();
    let base = quantized_base(&ds);
    let mut flat = FlatIndex::new(32, Metric::L2);
    flat.add(ds.database(), ds.nb()).unwrap();
    let index = RefineIndex::new(base, flat).unwrap();

    for radius in [f32::NAN, f32::INFINITY, -1.0, 0.0] {
        assert!(matches!(
            index.range_search(&ds.queries()[..32], 1, radius, None),
            Err(Error::InvalidArgument(_))
        ));
    }
}

/// A refinement member missing ids the base holds surfaces as an error
/// rather than wrong distances.
#[test]
fn missing_refinement_ids_are_detected() {
    let ds = dataset();
    let base = quantized_base(&ds);

    let mut flat = FlatIndex::new(32, Metric::L2);
    // Only half the database: upper ids exist in the base alone.
    let half = ds.nb() / 2;
    flat.add(&ds.database()[..half * 32], half).unwrap();
    let index = RefineIndex::new(base, flat).unwrap();

    assert!(matches!(
        index.range_search(ds.queries(), ds.nq(), RADIUS, None),
        Err(Error::IdOutOfRange { .. })
    ));
}
