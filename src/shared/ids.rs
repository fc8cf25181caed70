use getrandom::getrandom;

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_WIDTH: usize = 6;

fn base36_encode_u64(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while value > 0 {
        chars.push(BASE36_ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    chars.into_iter().rev().collect()
}

fn base36_encode_fixed(mut value: u64, width: usize) -> String {
    let mut chars = vec!['0'; width];
    for idx in (0..width).rev() {
        chars[idx] = BASE36_ALPHABET[(value % 36) as usize] as char;
        value /= 36;
    }
    chars.into_iter().collect()
}

/// Generated resource identifiers only need to be unique enough for the
/// orchestrator to track a resource it never supplied an id for.
pub fn generate_physical_resource_id(now: i64) -> String {
    let timestamp = u64::try_from(now).unwrap_or(0);
    let mut bytes = [0_u8; 8];
    let sample = if getrandom(&mut bytes).is_ok() {
        u64::from_le_bytes(bytes)
    } else {
        timestamp.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407)
    };
    format!(
        "vmsh-{}-{}",
        base36_encode_u64(timestamp),
        base36_encode_fixed(sample % 36_u64.pow(SUFFIX_WIDTH as u32), SUFFIX_WIDTH),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base36_round_numbers() {
        assert_eq!(base36_encode_u64(0), "0");
        assert_eq!(base36_encode_u64(35), "z");
        assert_eq!(base36_encode_u64(36), "10");
        assert_eq!(base36_encode_fixed(35, 4), "000z");
    }

    #[test]
    fn generated_ids_are_prefixed_and_distinct() {
        let a = generate_physical_resource_id(1_700_000_000);
        let b = generate_physical_resource_id(1_700_000_000);
        assert!(a.starts_with("vmsh-"));
        assert_ne!(a, b);
    }
}
