use genomask::empty_cache::empty_mask;
use genomask::{PatientMask, PatientUniverse};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

const TRIALS: usize = 200;

/// A random mask over `patients`, in whichever representation `threshold` picks.
fn random_mask(rng: &mut StdRng, patients: usize) -> PatientMask {
    let density = rng.gen_range(0.0..0.5);
    let positions: Vec<u32> = (0..patients as u32)
        .filter(|_| rng.gen_bool(density))
        .collect();
    let threshold = if rng.gen_bool(0.5) { 0 } else { patients };
    PatientMask::from_positions(patients, positions, threshold)
}

fn members(mask: &PatientMask) -> BTreeSet<u32> {
    mask.positions().collect()
}

#[test]
fn empty_mask_has_no_members_for_any_length() {
    for n in 0..150 {
        let mask = empty_mask(n);
        assert_eq!(mask.bit_count(), 0);
        assert!((0..n).all(|i| !mask.test_bit(i)), "length {n}");
    }
}

#[test]
fn union_is_commutative_and_associative() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0001);
    for _ in 0..TRIALS {
        let n = rng.gen_range(1..200);
        let a = random_mask(&mut rng, n);
        let b = random_mask(&mut rng, n);
        let c = random_mask(&mut rng, n);

        let ab = a.union(&b).unwrap();
        let ba = b.union(&a).unwrap();
        assert!(ab.same_members(&ba));

        let left = ab.union(&c).unwrap();
        let right = a.union(&b.union(&c).unwrap()).unwrap();
        assert!(left.same_members(&right));

        let expected: BTreeSet<u32> = members(&a).union(&members(&b)).copied().collect();
        assert_eq!(members(&ab), expected);
    }
}

#[test]
fn intersection_is_contained_in_both_operands() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0002);
    for _ in 0..TRIALS {
        let n = rng.gen_range(1..200);
        let a = random_mask(&mut rng, n);
        let b = random_mask(&mut rng, n);

        let both = a.intersection(&b).unwrap();
        let expected: BTreeSet<u32> = members(&a).intersection(&members(&b)).copied().collect();
        assert_eq!(members(&both), expected);
        assert!(both.same_members(&b.intersection(&a).unwrap()));
        assert!(a.union(&both).unwrap().same_members(&a));
    }
}

#[test]
fn append_places_each_operand_in_its_own_range() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0003);
    for _ in 0..TRIALS {
        let len_a = rng.gen_range(0..150);
        let len_b = rng.gen_range(0..150);
        let a = random_mask(&mut rng, len_a);
        let b = random_mask(&mut rng, len_b);

        let joined = PatientMask::append(Some(&a), len_a, Some(&b), len_b).unwrap();
        assert_eq!(joined.len(), len_a + len_b);
        for i in 0..len_a {
            assert_eq!(joined.test_bit(i), a.test_bit(i));
        }
        for j in 0..len_b {
            assert_eq!(joined.test_bit(len_a + j), b.test_bit(j));
        }
        assert_eq!(joined.to_string().len(), len_a + len_b + 4);
    }
}

#[test]
fn patient_ids_do_not_depend_on_representation() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0004);
    for _ in 0..TRIALS {
        let n = rng.gen_range(1..120);
        let universe = PatientUniverse::from_ids((0..n as i32).map(|i| 1_000 + i * 7));
        let mask = random_mask(&mut rng, n);

        let as_dense = PatientMask::Dense(mask.to_dense());
        let as_sparse = PatientMask::Sparse(mask.to_sparse());
        let ids = mask.to_patient_id_set(&universe).unwrap();
        assert_eq!(as_dense.to_patient_id_set(&universe).unwrap(), ids);
        assert_eq!(as_sparse.to_patient_id_set(&universe).unwrap(), ids);
        assert_eq!(ids.len(), mask.bit_count());
    }
}

#[test]
fn bit_strings_survive_display_and_parse() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0005);
    for _ in 0..50 {
        let n = rng.gen_range(0..300);
        let mask = random_mask(&mut rng, n);
        let parsed: PatientMask = mask.to_string().parse().unwrap();
        assert!(parsed.is_dense());
        assert!(parsed.same_members(&mask));
    }
}
