use evenodd_core::codec::EvenOdd;
use rand::{rngs::StdRng, Rng, SeedableRng};

const PRIMES: &[usize] = &[3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97];

fn encoded_stripe(p: usize, cell: usize, seed: u64) -> Vec<Vec<u8>> {
    let codec = EvenOdd::new(p, cell).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut shards: Vec<Vec<u8>> = (0..p + 2)
        .map(|u| {
            if u < p {
                (0..codec.column_len()).map(|_| rng.gen()).collect()
            } else {
                vec![0u8; codec.column_len()]
            }
        })
        .collect();
    let mut refs: Vec<&mut [u8]> = shards.iter_mut().map(|v| v.as_mut_slice()).collect();
    codec.encode(&mut refs).unwrap();
    shards
}

fn check_pair(p: usize, cell: usize, shards: &[Vec<u8>], missing: &[usize]) {
    let codec = EvenOdd::new(p, cell).unwrap();
    let mut opts: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
    for &u in missing {
        opts[u] = None;
    }
    codec.reconstruct(&mut opts).unwrap();
    for (u, col) in shards.iter().enumerate() {
        assert_eq!(
            opts[u].as_ref().unwrap(),
            col,
            "p={} missing={:?}: column {} differs",
            p,
            missing,
            u
        );
    }
}

#[test]
fn reconstruct_representative_pairs() {
    let p = 11;
    let cell = 512;
    let shards = encoded_stripe(p, cell, 42);
    for missing in [
        vec![0],
        vec![7],
        vec![p],
        vec![p + 1],
        vec![0, 1],
        vec![3, 8],
        vec![4, p],
        vec![4, p + 1],
        vec![p, p + 1],
    ] {
        check_pair(p, cell, &shards, &missing);
    }
}

// Every {a, b} pair of the p+2 columns, for every supported prime. One-byte
// cells keep the grid small enough to sweep the whole parameter space.
#[test]
fn reconstruct_every_pair_for_every_prime() {
    for (i, &p) in PRIMES.iter().enumerate() {
        let shards = encoded_stripe(p, 1, 1000 + i as u64);
        for a in 0..p + 2 {
            check_pair(p, 1, &shards, &[a]);
            for b in a + 1..p + 2 {
                check_pair(p, 1, &shards, &[a, b]);
            }
        }
    }
}

#[test]
fn reconstruct_with_nothing_missing_is_a_no_op() {
    let p = 5;
    let shards = encoded_stripe(p, 16, 7);
    let codec = EvenOdd::new(p, 16).unwrap();
    let mut opts: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
    codec.reconstruct(&mut opts).unwrap();
    for (u, col) in shards.iter().enumerate() {
        assert_eq!(opts[u].as_ref().unwrap(), col);
    }
}

#[test]
fn reconstruct_rejects_three_missing() {
    let p = 7;
    let shards = encoded_stripe(p, 8, 9);
    let codec = EvenOdd::new(p, 8).unwrap();
    let mut opts: Vec<Option<Vec<u8>>> = shards.iter().cloned().map(Some).collect();
    opts[0] = None;
    opts[3] = None;
    opts[p] = None;
    let err = codec.reconstruct(&mut opts).unwrap_err();
    assert!(err.to_string().contains("at most 2"), "unexpected error: {err}");
}

#[test]
fn codec_rejects_bad_parameters() {
    assert!(EvenOdd::new(9, 1).is_err()); // not prime
    assert!(EvenOdd::new(2, 1).is_err()); // even
    assert!(EvenOdd::new(101, 1).is_err()); // out of range
    assert!(EvenOdd::new(5, 0).is_err()); // empty cell
    assert!(EvenOdd::new(97, 1).is_ok());
}

#[test]
fn encode_rejects_short_columns() {
    let codec = EvenOdd::new(5, 4).unwrap();
    let mut shards: Vec<Vec<u8>> = (0..7).map(|_| vec![0u8; codec.column_len()]).collect();
    shards[2].truncate(3);
    let mut refs: Vec<&mut [u8]> = shards.iter_mut().map(|v| v.as_mut_slice()).collect();
    assert!(codec.encode(&mut refs).is_err());
}
