//! Property tests for the codec, channel and snapshot layers.

use std::net::SocketAddr;

use glam::Vec3;
use proptest::prelude::*;
use strafe::bitstream::{quantize, read_delta, write_delta, FieldKind, FieldValue};
use strafe::net::{decode_client_payload, next_sequence, sequence_greater_than};
use strafe::{
    BitReader, BitWriter, Channel, ChannelConfig, ConnectionState, ConnectionlessPacket,
    EntityFlags, EntityState, PlayerState, SnapshotBuilder, SnapshotReconstructor,
};

fn vec3(range: f32) -> impl Strategy<Value = Vec3> {
    (-range..range, -range..range, -range..range).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

fn entity_state() -> impl Strategy<Value = EntityState> {
    (
        (0u16..1023, 0u8..10, any::<u16>(), 0u16..1024),
        (vec3(4000.0), vec3(1000.0), vec3(179.0)),
        (any::<u8>(), any::<u8>(), 0u16..1024, any::<u8>()),
        (0u16..1024, 0u16..1024),
    )
        .prop_map(
            |(
                (number, entity_type, flags, model_index),
                (origin, velocity, angles),
                (animation_state, animation_frame, event, event_param),
                (ground_entity, owner),
            )| EntityState {
                number,
                entity_type,
                flags: EntityFlags::from_bits_retain(flags),
                origin,
                velocity,
                angles,
                model_index,
                animation_state,
                animation_frame,
                event,
                event_param,
                ground_entity,
                owner,
            },
        )
}

fn channel_pair() -> (Channel, Channel) {
    let a: SocketAddr = "127.0.0.1:27960".parse().unwrap();
    let b: SocketAddr = "127.0.0.1:27961".parse().unwrap();
    (
        Channel::established(b, ChannelConfig::default()),
        Channel::established(a, ChannelConfig::default()),
    )
}

proptest! {
    #[test]
    fn net_float_error_is_half_a_step(value in -100_000.0f32..100_000.0) {
        let kind = FieldKind::NetFloat { bits: 24, scale: 8.0 };
        let raw = kind.encode(FieldValue::Float(value)).unwrap();
        let decoded = kind.decode(raw).as_f32();
        prop_assert!((decoded - value).abs() <= 0.5 / 8.0 + 0.01);
    }

    /// A delta against a quantized baseline reconstructs the quantized target exactly.
    #[test]
    fn delta_reconstructs_quantized_state(old in entity_state(), new in entity_state()) {
        let old = quantize(&old);
        // the entity number travels in the snapshot's entity list, not in the delta
        let new = quantize(&EntityState { number: old.number, ..new });

        let mut writer = BitWriter::new();
        write_delta(&mut writer, &old, &new).unwrap();
        let bytes = writer.finish().unwrap();

        let decoded = read_delta(&mut BitReader::new(&bytes), &old).unwrap();
        prop_assert_eq!(decoded, new);
    }

    #[test]
    fn quantize_is_idempotent(state in entity_state()) {
        let once = quantize(&state);
        prop_assert_eq!(quantize(&once), once);
    }

    #[test]
    fn unchanged_state_costs_one_bit(state in entity_state()) {
        let mut writer = BitWriter::new();
        let changed = write_delta(&mut writer, &state, &state).unwrap();
        prop_assert!(!changed);
        prop_assert_eq!(writer.bits_written(), 1);
    }

    #[test]
    fn player_origin_is_exact(origin in vec3(100_000.0)) {
        let new = PlayerState { origin, ..Default::default() };

        let mut writer = BitWriter::new();
        write_delta(&mut writer, &PlayerState::default(), &new).unwrap();
        let bytes = writer.finish().unwrap();

        let decoded = read_delta(&mut BitReader::new(&bytes), &PlayerState::default()).unwrap();
        prop_assert_eq!(decoded.origin, origin);
    }

    #[test]
    fn next_sequence_is_always_newer(sequence in 0..u32::MAX) {
        let next = next_sequence(sequence);
        prop_assert_ne!(next, u32::MAX);
        prop_assert!(sequence_greater_than(next, sequence));
        prop_assert!(!sequence_greater_than(sequence, next));
    }

    /// Fragments of one message reassemble in any arrival order.
    #[test]
    fn fragments_reassemble_in_any_order(
        (payload, order) in prop::collection::vec(any::<u8>(), 1..12_000)
            .prop_flat_map(|payload| {
                let count = payload.len() / 1000 + 2;
                (Just(payload), Just((0..count).collect::<Vec<usize>>()).prop_shuffle())
            }),
    ) {
        let (mut sender, mut receiver) = channel_pair();
        let datagrams = sender.packetize(&payload).unwrap();

        let mut delivered = Vec::new();
        for index in order.into_iter().filter(|&i| i < datagrams.len()) {
            if let Some(message) = receiver.process(&datagrams[index]).unwrap() {
                delivered.push(message);
            }
        }

        prop_assert_eq!(delivered, vec![payload]);
    }

    /// Applied snapshot sequences only ever move forward, whatever order they arrive in.
    #[test]
    fn reconstructor_applies_monotonically(
        order in Just((0..12usize).collect::<Vec<_>>()).prop_shuffle(),
        entities in prop::collection::vec(entity_state(), 0..8),
    ) {
        let builder = SnapshotBuilder::default();
        let mut state = ConnectionState::default();
        let encoded: Vec<_> = (0..12u32)
            .map(|time| {
                builder
                    .build(&mut state, time, &PlayerState::default(), &entities)
                    .unwrap()
            })
            .collect();

        let mut client = SnapshotReconstructor::default();
        let mut last = None;
        for index in order {
            let result = client.read_snapshot(&mut BitReader::new(&encoded[index].bytes));
            if let Ok((snapshot, _)) = result {
                prop_assert!(last.is_none_or(|last| sequence_greater_than(snapshot.sequence, last)));
                last = Some(snapshot.sequence);
            }
            prop_assert_eq!(client.last_applied(), last);
        }
    }

    #[test]
    fn arbitrary_bytes_dont_crash_decoders(
        random_bytes in prop::collection::vec(any::<u8>(), 0..2000),
    ) {
        let _ = decode_client_payload(&random_bytes);
        let _ = ConnectionlessPacket::deserialize(&random_bytes);
        let _ = SnapshotReconstructor::default().read_snapshot(&mut BitReader::new(&random_bytes));

        let (_, mut receiver) = channel_pair();
        let _ = receiver.process(&random_bytes);
    }
}
