use anyhow::Result;

/// Rounds `size` up to the next multiple of `alignment`, which must be a
/// power of two.
pub fn round_up(size: u32, alignment: u32) -> u32 {
    debug_assert!(
        alignment.is_power_of_two(),
        "alignment {alignment} is not a power of two"
    );
    ((size + alignment - 1) / alignment) * alignment
}

pub fn read_shader_from_bytes(bytes: &[u8]) -> Result<Vec<u32>> {
    let mut cursor = std::io::Cursor::new(bytes);
    Ok(ash::util::read_spv(&mut cursor)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_bounds_hold_for_power_of_two_alignments() {
        for shift in 0..10 {
            let alignment = 1u32 << shift;
            for size in 0..2048 {
                let rounded = round_up(size, alignment);
                assert!(rounded >= size);
                assert_eq!(rounded % alignment, 0);
                assert!(rounded < size + alignment);
            }
        }
    }

    #[test]
    fn aligned_sizes_are_unchanged() {
        assert_eq!(round_up(0, 64), 0);
        assert_eq!(round_up(64, 64), 64);
        assert_eq!(round_up(32, 64), 64);
        assert_eq!(round_up(96, 64), 128);
    }

    #[test]
    fn spirv_words_are_decoded() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        let words = read_shader_from_bytes(&bytes).unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
    }

    #[test]
    fn truncated_spirv_is_rejected() {
        assert!(read_shader_from_bytes(&[0x03, 0x02, 0x23]).is_err());
    }
}
