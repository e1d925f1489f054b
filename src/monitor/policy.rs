/// Online time only counts while the network answers and nobody locked the session.
pub fn should_run(reachable: bool, locked: bool) -> bool {
    reachable && !locked
}

#[cfg(test)]
mod tests {
    use super::should_run;

    #[test]
    fn test_policy_truth_table() {
        assert!(!should_run(true, true));
        assert!(!should_run(false, false));
        assert!(!should_run(false, true));
        assert!(should_run(true, false));
    }
}
