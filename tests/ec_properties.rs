use dicekey::buffer::{ByteBuffer, deserialise_byte_buffers, serialise_byte_buffers};
use dicekey::ec::{EcError, EcGroup, verify_ecdsa};
use rand::{Rng, SeedableRng};

fn groups() -> [&'static EcGroup; 2] {
    [EcGroup::p256(), EcGroup::p384()]
}

fn random_scalar(rng: &mut impl Rng, group: &EcGroup) -> ByteBuffer {
    (0..group.field_size()).map(|_| rng.gen()).collect()
}

#[test]
fn test_group_laws() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    for group in groups() {
        let g = group.generator_mul(&ByteBuffer::from([1])).unwrap();
        for _ in 0..8 {
            let k = random_scalar(&mut rng, group);
            let p = group.generator_mul(&k).unwrap();
            assert!(group.point_is_on_curve(&p));
            assert_eq!(group.point_mul(&k, &g).unwrap(), p);

            let neg = group.point_invert(&p).unwrap();
            let sum = group.point_add(&p, &neg).unwrap();
            assert!(group.point_is_at_infinity(&sum).unwrap());

            let inf = group.infinity();
            assert_eq!(group.point_add(&inf, &p).unwrap(), p);
            assert_eq!(group.point_add(&p, &inf).unwrap(), p);
        }
    }
}

#[test]
fn test_invalid_points_rejected() {
    for group in groups() {
        let mut bogus = group.generate_key_pair().public;
        let last = bogus.len() - 1;
        bogus[last] ^= 0x01;
        assert!(!group.point_is_on_curve(&bogus));
        assert_eq!(group.point_is_at_infinity(&bogus), Err(EcError::InvalidPoint));
        assert_eq!(group.point_invert(&bogus), Err(EcError::InvalidPoint));
        assert!(group.point_is_at_infinity(&ByteBuffer::from([0x00])).unwrap());
    }
}

#[test]
fn test_sign_verify_by_curve_name() {
    for (group, name) in [(EcGroup::p256(), "prime256v1"), (EcGroup::p384(), "secp384r1")] {
        let pair = group.generate_key_pair();
        let digest = group.digest(b"message");
        let (r, s) = group.sign_digest(&pair.private, digest.as_slice()).unwrap();
        assert!(verify_ecdsa(name, &pair.public, &digest, &r, &s).unwrap());

        let other = group.digest(b"other message");
        assert!(!verify_ecdsa(name, &pair.public, &other, &r, &s).unwrap());

        let short = ByteBuffer::with_len(20);
        assert_eq!(
            verify_ecdsa(name, &pair.public, &short, &r, &s),
            Err(EcError::InvalidDigest(20))
        );
        let zero = ByteBuffer::with_len(group.field_size());
        assert_eq!(
            verify_ecdsa(name, &pair.public, &digest, &zero, &s),
            Err(EcError::InvalidSignature)
        );
        assert_eq!(
            verify_ecdsa(name, &group.infinity(), &digest, &r, &s),
            Err(EcError::InvalidPoint)
        );
    }
    assert!(matches!(
        verify_ecdsa("secp256k1", &ByteBuffer::new(), &ByteBuffer::new(), &ByteBuffer::new(), &ByteBuffer::new()),
        Err(EcError::UnknownCurve(_))
    ));
}

#[test]
fn test_framing_roundtrips_random_sequences() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(2);
    for _ in 0..50 {
        let items: Vec<ByteBuffer> = (0..rng.gen_range(0..6))
            .map(|_| (0..rng.gen_range(0..80)).map(|_| rng.gen::<u8>()).collect())
            .collect();
        let framed = serialise_byte_buffers(&items).unwrap();
        assert_eq!(deserialise_byte_buffers(&framed).unwrap(), items);

        let hex = framed.to_hex_string();
        assert_eq!(ByteBuffer::from_hex(&hex.to_uppercase()).unwrap(), framed);
    }
}
