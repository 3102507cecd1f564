/// Default prefix for human-facing order ids.
pub const DEFAULT_PREFIX: &str = "SRP";

/// Next sequential id: the highest numeric suffix among `existing` ids that
/// carry `prefix`, plus one, padded to at least three digits. Ids that do
/// not parse are ignored.
pub fn next_order_id<'a, I>(existing: I, prefix: &str) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let max = existing
        .into_iter()
        .filter_map(|id| id.trim().strip_prefix(prefix))
        .filter_map(|suffix| suffix.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("{}{:03}", prefix, max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_id() {
        assert_eq!(next_order_id(Vec::<&str>::new(), "SRP"), "SRP001");
    }

    #[test]
    fn test_uses_max_not_count() {
        let ids = ["SRP001", "SRP007", "SRP003"];
        assert_eq!(next_order_id(ids, "SRP"), "SRP008");
    }

    #[test]
    fn test_ignores_foreign_and_garbage_ids() {
        let ids = ["O1", "SRPxyz", "", "SRP002", "ABC999"];
        assert_eq!(next_order_id(ids, "SRP"), "SRP003");
    }

    #[test]
    fn test_grows_past_three_digits() {
        assert_eq!(next_order_id(["SRP999"], "SRP"), "SRP1000");
    }
}
