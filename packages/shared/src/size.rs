//! Human-readable byte sizes for transfer notices.

const KB: u64 = 1 << 10;
const MB: u64 = 1 << 20;
const GB: u64 = 1 << 30;

/// Format a byte count using binary units (B, KB, MB, GB).
///
/// The largest unit whose value is at least 1 wins. Non-byte units carry
/// exactly one decimal, rounded half up; plain bytes have no decimal.
pub fn human_size(length: u64) -> String {
    for (unit, suffix) in [(GB, "GB"), (MB, "MB"), (KB, "KB")] {
        if length >= unit {
            // Integer tenths so ties round up exactly.
            let tenths = (u128::from(length) * 10 + u128::from(unit) / 2) / u128::from(unit);
            return format!("{}.{}{}", tenths / 10, tenths % 10, suffix);
        }
    }
    format!("{}B", length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_below_one_kilobyte() {
        // テスト項目: 1KB 未満は小数なしのバイト表記になる
        // given (前提条件) / when (操作) / then (期待する結果):
        assert_eq!(human_size(0), "0B");
        assert_eq!(human_size(1023), "1023B");
    }

    #[test]
    fn test_unit_boundaries() {
        // テスト項目: ちょうど単位境界の値は 1.0 表記になる
        // given (前提条件) / when (操作) / then (期待する結果):
        assert_eq!(human_size(1024), "1.0KB");
        assert_eq!(human_size(1 << 20), "1.0MB");
        assert_eq!(human_size(5 << 30), "5.0GB");
    }

    #[test]
    fn test_rounds_half_up_to_one_decimal() {
        // テスト項目: 小数第 2 位が 5 のとき切り上げられる
        // given (前提条件):
        let one_and_quarter_kb = 1280; // 1.25KB

        // when (操作):
        let result = human_size(one_and_quarter_kb);

        // then (期待する結果):
        assert_eq!(result, "1.3KB");
        assert_eq!(human_size(1536), "1.5KB");
        assert_eq!(human_size(1_572_864), "1.5MB");
    }

    #[test]
    fn test_just_below_next_unit_stays_in_smaller_unit() {
        // テスト項目: 次の単位に届かない値は小さい単位のまま丸められる
        // given (前提条件):
        let almost_one_mb = (1 << 20) - 1;

        // when (操作):
        let result = human_size(almost_one_mb);

        // then (期待する結果):
        assert_eq!(result, "1024.0KB");
    }
}
