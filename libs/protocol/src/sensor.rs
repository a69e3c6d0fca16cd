//! Decoders for sensor port status records.

use crate::Error;

pub const BUMPER_STATUS_LEN: usize = 2;
pub const DISTANCE_STATUS_LEN: usize = 4;
pub const COLOR_STATUS_LEN: usize = 12;

/// Range reported to callers of the ultrasonic sensor, in centimetres.
pub const DISTANCE_MAX_CM: i32 = 700;

pub fn decode_bumper(raw: &[u8]) -> Result<bool, Error> {
    match raw {
        [pressed, _] => Ok(*pressed == 1),
        _ => Err(Error::LengthMismatch),
    }
}

/// HC-SR04 distance in centimetres. A zero reading means no echo was
/// received and yields `None`.
pub fn decode_distance(raw: &[u8]) -> Result<Option<i32>, Error> {
    let raw: [u8; DISTANCE_STATUS_LEN] = raw.try_into().map_err(|_| Error::LengthMismatch)?;
    match i32::from_le_bytes(raw) {
        0 => Ok(None),
        cm => Ok(Some(cm)),
    }
}

pub fn clamp_distance(cm: i32) -> i32 {
    cm.clamp(0, DISTANCE_MAX_CM)
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ColorReading {
    pub top: Rgb,
    pub right: Rgb,
    pub left: Rgb,
    pub middle: Rgb,
}

/// Four RGB triples in top, right, left, middle order. Anything but a full
/// 12-byte record reads as all zeros.
pub fn decode_color(raw: &[u8]) -> ColorReading {
    let Ok(raw) = <&[u8; COLOR_STATUS_LEN]>::try_from(raw) else {
        return ColorReading::default();
    };
    let rgb = |i: usize| Rgb {
        r: raw[i],
        g: raw[i + 1],
        b: raw[i + 2],
    };
    ColorReading {
        top: rgb(0),
        right: rgb(3),
        left: rgb(6),
        middle: rgb(9),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bumper_pressed_only_on_one() {
        assert_eq!(decode_bumper(&[1, 0]), Ok(true));
        assert_eq!(decode_bumper(&[0, 1]), Ok(false));
        assert_eq!(decode_bumper(&[2, 0]), Ok(false));
        assert_eq!(decode_bumper(&[1]), Err(Error::LengthMismatch));
    }

    #[test]
    fn distance_zero_is_no_echo() {
        assert_eq!(decode_distance(&[0, 0, 0, 0]), Ok(None));
        assert_eq!(decode_distance(&[0x2A, 0, 0, 0]), Ok(Some(42)));
        assert_eq!(decode_distance(&[0x2A, 0]), Err(Error::LengthMismatch));
        assert_eq!(clamp_distance(1200), 700);
        assert_eq!(clamp_distance(-3), 0);
    }

    #[test]
    fn color_order() {
        let raw = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let reading = decode_color(&raw);
        assert_eq!(reading.top, Rgb { r: 1, g: 2, b: 3 });
        assert_eq!(reading.right, Rgb { r: 4, g: 5, b: 6 });
        assert_eq!(reading.left, Rgb { r: 7, g: 8, b: 9 });
        assert_eq!(reading.middle, Rgb { r: 10, g: 11, b: 12 });
    }

    #[test]
    fn short_color_read_is_zero() {
        assert_eq!(decode_color(&[9; 11]), ColorReading::default());
        assert_eq!(decode_color(&[]), ColorReading::default());
    }
}
