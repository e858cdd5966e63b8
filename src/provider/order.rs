//! # Install Sequencer
//!
//! Orders providers by `(install_order, name)`. The name tie-break only makes
//! the order reproducible; it says nothing about dependencies.

use crate::provider::Provider;

/// Sort providers into install order, in place
pub fn sort_by_install_order(providers: &mut [Provider]) {
    providers.sort_by(|a, b| {
        a.install_order
            .cmp(&b.install_order)
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderType;

    fn provider(name: &str, order: i32) -> Provider {
        Provider {
            name: name.to_string(),
            namespace: "ns".to_string(),
            version: "v1.0.0".to_string(),
            provider_type: ProviderType::Infrastructure,
            install_order: order,
        }
    }

    fn names(providers: &[Provider]) -> Vec<&str> {
        providers.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_sorts_by_order_then_name() {
        let mut providers = vec![
            provider("aws", 20),
            provider("core", 10),
            provider("azure", 20),
            provider("bootstrap", 30),
        ];
        sort_by_install_order(&mut providers);
        assert_eq!(names(&providers), vec!["core", "aws", "azure", "bootstrap"]);
    }

    #[test]
    fn test_equal_order_falls_back_to_name() {
        let mut providers = vec![
            provider("zebra", 20),
            provider("alpha", 20),
            provider("beta", 20),
        ];
        sort_by_install_order(&mut providers);
        assert_eq!(names(&providers), vec!["alpha", "beta", "zebra"]);
    }

    #[test]
    fn test_empty_and_single() {
        let mut empty: Vec<Provider> = Vec::new();
        sort_by_install_order(&mut empty);
        assert!(empty.is_empty());

        let mut single = vec![provider("core", 10)];
        sort_by_install_order(&mut single);
        assert_eq!(names(&single), vec!["core"]);
    }

    #[test]
    fn test_output_is_non_decreasing() {
        let mut providers: Vec<Provider> = (0..20)
            .map(|i| provider(&format!("p{}", (i * 7) % 13), (i * 5) % 3))
            .collect();
        sort_by_install_order(&mut providers);
        for pair in providers.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(
                (a.install_order, &a.name) <= (b.install_order, &b.name),
                "{} ({}) sorted before {} ({})",
                a.name,
                a.install_order,
                b.name,
                b.install_order
            );
        }
    }
}
