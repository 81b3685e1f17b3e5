//! Integration tests for the remote-input codec through the public API.

use share_core::{decode_pointer_event, encode_pointer_event, CodecError, PointerEvent, PointerKind};

#[test]
fn test_round_trip_over_a_coordinate_grid() {
    let steps = 16;
    for kind in [PointerKind::Move, PointerKind::Down, PointerKind::Up] {
        for i in 0..=steps {
            for j in 0..=steps {
                let x = f64::from(i) / f64::from(steps);
                let y = f64::from(j) / f64::from(steps);
                let original = PointerEvent::new(kind, x, y).expect("grid point is in range");

                let decoded = decode_pointer_event(&encode_pointer_event(&original))
                    .expect("encoded event must decode");

                assert_eq!(decoded, original);
            }
        }
    }
}

#[test]
fn test_view_point_survives_the_wire_and_maps_to_receiver_pixels() {
    // Arrange: viewer window 800x600, sharer screen 1920x1080.
    let sent = PointerEvent::from_view_point(PointerKind::Down, 400.0, 150.0, 800.0, 600.0);

    // Act
    let received = decode_pointer_event(&encode_pointer_event(&sent)).unwrap();

    // Assert
    assert_eq!(received.to_pixels(1920, 1080), (960.0, 270.0));
}

#[test]
fn test_garbage_is_malformed() {
    for bytes in [&b""[..], &b"\xff"[..], &b"\x84\xa4type"[..], &b"hello"[..]] {
        let err = decode_pointer_event(bytes).unwrap_err();
        assert!(
            !matches!(err, CodecError::OutOfRange { .. }),
            "structural error expected for {bytes:?}, got {err:?}"
        );
    }
}
