//! # tabdump transformers
//!
//! Row transformer implementations for the tabdump pipeline: column
//! anonymization with locale-aware synthetic data ([`FakeDataTransformer`])
//! and template-based column rewriting ([`FormatDataTransformer`]), plus the
//! dependency-ordered template engine both share.
//!
//! Transformers plug into the orchestrator through descriptors added by
//! [`register`]; their order there is their order in the pipeline (fake
//! first, so format templates can reference generated virtual columns).

use tabdump_core::{
    DataTransformer, OptionsRegistry, ProviderCatalog, Result, TransformerDescriptor,
};

pub mod fake;
pub mod faker;
pub mod format;
pub mod template;

pub use fake::{FakeDataTransformer, FakeOptions};
pub use faker::{FakeMethod, FakerRegistry};
pub use format::{FormatDataTransformer, FormatOptions};

fn construct_fake(registry: &OptionsRegistry) -> Result<Box<dyn DataTransformer>> {
    let options = registry.get_or_default::<FakeOptions>();
    Ok(Box::new(FakeDataTransformer::new(options)?))
}

fn construct_format(registry: &OptionsRegistry) -> Result<Box<dyn DataTransformer>> {
    let options = registry.get_or_default::<FormatOptions>();
    Ok(Box::new(FormatDataTransformer::new(options)))
}

/// Adds the built-in transformer descriptors to the catalog.
pub fn register(catalog: &mut ProviderCatalog) {
    catalog.add_transformer(TransformerDescriptor {
        name: "fake",
        enabled: |registry| registry.get_or_default::<FakeOptions>().is_active(),
        construct: construct_fake,
    });
    catalog.add_transformer(TransformerDescriptor {
        name: "format",
        enabled: |registry| registry.get_or_default::<FormatOptions>().is_active(),
        construct: construct_format,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_activate_on_bound_options() {
        let mut catalog = ProviderCatalog::new();
        register(&mut catalog);
        assert_eq!(catalog.transformers().len(), 2);

        let mut registry = OptionsRegistry::new();
        assert!(!(catalog.transformers()[0].enabled)(&registry));

        registry.bind(FakeOptions {
            null_columns: vec!["ssn".into()],
            ..Default::default()
        });
        assert!((catalog.transformers()[0].enabled)(&registry));
        assert!(!(catalog.transformers()[1].enabled)(&registry));
    }
}
