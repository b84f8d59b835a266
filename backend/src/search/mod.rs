//! Tantivy-based search index module.
//!
//! Provides full-text search over opportunities with field boosting. The
//! index holds every opportunity regardless of status; callers filter the
//! hits against the database for visibility.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::Opportunity;

/// Field boost values.
const BOOST_TITLE: f32 = 10.0;
const BOOST_TAGS: f32 = 7.0;
const BOOST_ORGANIZATION: f32 = 5.0;
const BOOST_DOMAIN: f32 = 4.0;
const BOOST_TYPE: f32 = 3.0;
const BOOST_DESCRIPTION: f32 = 2.5;

/// Search hit with relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub opportunity_id: String,
    pub score: f32,
}

/// Search index schema fields.
struct SearchFields {
    opportunity_id: Field,
    title: Field,
    description: Field,
    domain: Field,
    organization: Field,
    tags: Field,
    opportunity_type: Field,
}

/// Tantivy search index for opportunities.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        // Untokenized so updates can delete by id
        let opportunity_id = schema_builder.add_text_field("opportunity_id", STRING | STORED);
        let title = schema_builder.add_text_field("title", TEXT | STORED);
        let description = schema_builder.add_text_field("description", TEXT);
        let domain = schema_builder.add_text_field("domain", TEXT);
        let organization = schema_builder.add_text_field("organization", TEXT);
        let tags = schema_builder.add_text_field("tags", TEXT);
        let opportunity_type = schema_builder.add_text_field("opportunity_type", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            opportunity_id,
            title,
            description,
            domain,
            organization,
            tags,
            opportunity_type,
        };

        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Rebuild the entire index.
    pub async fn rebuild(&self, opportunities: &[Opportunity]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for opportunity in opportunities {
            writer.add_document(self.create_document(opportunity))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} opportunities", opportunities.len());
        Ok(())
    }

    /// Index (or re-index) a single opportunity.
    pub async fn index_opportunity(&self, opportunity: &Opportunity) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(self.id_term(&opportunity.id));
        writer.add_document(self.create_document(opportunity))?;
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Remove one opportunity from the index.
    pub async fn remove_opportunity(&self, id: &str) -> Result<(), AppError> {
        self.remove_opportunities(&[id]).await
    }

    /// Remove opportunities from the index in one commit.
    pub async fn remove_opportunities(&self, ids: &[&str]) -> Result<(), AppError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.write().await;

        for id in ids {
            writer.delete_term(self.id_term(id));
        }
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Search for opportunities matching the query, best first.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchResult>, AppError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        // User input is free text; syntax errors fall back to the parsable terms.
        let field_queries = [
            (self.fields.title, BOOST_TITLE),
            (self.fields.tags, BOOST_TAGS),
            (self.fields.organization, BOOST_ORGANIZATION),
            (self.fields.domain, BOOST_DOMAIN),
            (self.fields.opportunity_type, BOOST_TYPE),
            (self.fields.description, BOOST_DESCRIPTION),
        ];

        let subqueries: Vec<(Occur, Box<dyn Query>)> = field_queries
            .into_iter()
            .map(|(field, boost)| {
                let (field_query, _errors) = QueryParser::for_index(&self.index, vec![field])
                    .parse_query_lenient(query_str);
                let boosted: Box<dyn Query> = Box::new(BoostQuery::new(field_query, boost));
                (Occur::Should, boosted)
            })
            .collect();
        let combined_query = BooleanQuery::new(subqueries);

        let top_docs = searcher
            .search(&combined_query, &TopDocs::with_limit(limit + offset))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let results = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let opportunity_id = doc
                    .get_first(self.fields.opportunity_id)?
                    .as_str()?
                    .to_string();
                Some(SearchResult {
                    opportunity_id,
                    score,
                })
            })
            .collect();

        Ok(results)
    }

    fn id_term(&self, id: &str) -> Term {
        Term::from_field_text(self.fields.opportunity_id, id)
    }

    fn create_document(&self, opportunity: &Opportunity) -> TantivyDocument {
        doc!(
            self.fields.opportunity_id => opportunity.id.clone(),
            self.fields.title => opportunity.title.clone(),
            self.fields.description => opportunity.description.clone(),
            self.fields.domain => opportunity.domain.clone(),
            self.fields.organization => opportunity.organization.clone().unwrap_or_default(),
            self.fields.tags => opportunity.tags.join(" "),
            self.fields.opportunity_type => opportunity.opportunity_type.as_str().to_string()
        )
    }
}
