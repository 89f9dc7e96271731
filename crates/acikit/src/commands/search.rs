//! `acikit search <query>`: keyword/value search over the policy tree.

use tabled::Tabled;

use acikit_core::{Controller, ControllerConfig, DeepQuery, SearchHit, SearchIndex};

use crate::cli::{GlobalOpts, SearchArgs};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct HitRow {
    #[tabled(rename = "Keyword")]
    keyword: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Relation")]
    relation: String,
    #[tabled(rename = "Object")]
    object: String,
}

impl From<&SearchHit> for HitRow {
    fn from(hit: &SearchHit) -> Self {
        Self {
            keyword: hit.keyword.clone(),
            value: hit.value.clone(),
            relation: hit.relation.to_string(),
            object: hit.primary_dn.clone(),
        }
    }
}

pub async fn handle(
    config: ControllerConfig,
    args: SearchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let tenant = args.tenant;
    let snapshot = Controller::oneshot(config, |controller| async move {
        let query = DeepQuery::default();
        match tenant {
            Some(name) => controller.get_deep(&format!("uni/tn-{name}"), &query).await,
            None => controller.get_class_deep("fvTenant", &query).await,
        }
    })
    .await?;

    let index = SearchIndex::build(&snapshot.graph, snapshot.nodes());
    tracing::debug!(terms = index.len(), "search index built");

    let hits: Vec<SearchHit> = index.search(&args.query).into_iter().cloned().collect();
    let out = output::render_list(global.output, &hits, |h| HitRow::from(h), |h| {
        h.primary_dn.clone()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
