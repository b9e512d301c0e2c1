use crate::error::Result;
use crate::ranking::Bm25;
use crate::schema::TableNames;
use crate::schema_manager::FieldTable;
use quarry_core::{Analyzer, DocumentSchema, IndexConfig, Language};
use std::sync::Arc;

/// Everything an index operation needs besides the connection
#[derive(Debug, Clone)]
pub struct IndexContext {
    pub config: IndexConfig,
    pub schema: DocumentSchema,
    pub analyzer: Arc<Analyzer>,
    pub names: TableNames,
    pub fields: FieldTable,
    pub ranking: Bm25,
}

impl IndexContext {
    /// Validate the configuration; field ids are filled in by `ensure_schema`
    pub fn new(config: IndexConfig, analyzer: Analyzer) -> Result<Self> {
        let names = TableNames::new(&config.name)?;
        config.validate()?;
        let schema = config.schema()?;
        let ranking = Bm25::from_config(&config.ranking);

        Ok(Self { config, schema, analyzer: Arc::new(analyzer), names, fields: FieldTable::default(), ranking })
    }

    /// Analyzer for a locale override, or the index analyzer when there is none
    pub fn analyzer_for(&self, locale: Option<&str>) -> Result<Arc<Analyzer>> {
        match locale {
            Some(locale) if Language::from_locale(locale) != Language::from_locale(&self.config.language) => {
                Ok(Arc::new(Analyzer::for_locale(locale, &self.config)?))
            }
            _ => Ok(Arc::clone(&self.analyzer)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_rejects_invalid_index_name() {
        let config = IndexConfig { name: "bad name".to_string(), ..Default::default() };
        let err = IndexContext::new(config, Analyzer::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidIndexName(_)));

        let config = IndexConfig { name: "sqlite".to_string(), ..Default::default() };
        let err = IndexContext::new(config, Analyzer::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidIndexName(_)));
    }

    #[test]
    fn test_locale_override() {
        let ctx = IndexContext::new(IndexConfig::default(), Analyzer::default()).unwrap();
        assert!(Arc::ptr_eq(&ctx.analyzer_for(None).unwrap(), &ctx.analyzer));
        assert!(Arc::ptr_eq(&ctx.analyzer_for(Some("none")).unwrap(), &ctx.analyzer));
        assert_eq!(ctx.analyzer_for(Some("de_DE")).unwrap().name(), "standard:de");
    }

    #[test]
    fn test_unknown_locale_override_is_an_error() {
        let ctx = IndexContext::new(IndexConfig::default(), Analyzer::default()).unwrap();
        assert!(matches!(ctx.analyzer_for(Some("klingon")), Err(Error::Config(_))));
    }
}
