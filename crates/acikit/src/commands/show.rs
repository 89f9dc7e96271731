//! `acikit show <dn>`: one object and its subtree.

use acikit_core::{Controller, ControllerConfig, DeepQuery, RspSubtree};

use crate::cli::{GlobalOpts, ShowArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    config: ControllerConfig,
    args: ShowArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let query = DeepQuery {
        limit_to: args.classes,
        subtree: if args.children {
            RspSubtree::Children
        } else {
            RspSubtree::Full
        },
        config_only: args.config_only,
    };
    let dn = args.dn;

    let snapshot = Controller::oneshot(config, |controller| async move {
        controller.get_deep(&dn, &query).await
    })
    .await?;

    for err in &snapshot.report.errors {
        tracing::warn!(error = %err, "object skipped");
    }

    for id in snapshot.nodes() {
        let tree = snapshot.graph.get_json(*id);
        let out = output::render_tree(global.output, &tree, snapshot.graph.dn(*id));
        output::print_output(&out, global.quiet);
    }
    Ok(())
}
