//! `acikit class <name>`: list every object of a class.

use acikit_core::{Controller, ControllerConfig};

use crate::cli::{ClassArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

pub async fn handle(
    config: ControllerConfig,
    args: ClassArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let class_name = args.class_name;
    let snapshot = Controller::oneshot(config, |controller| async move {
        controller.get_class(&class_name).await
    })
    .await?;

    for err in &snapshot.report.errors {
        tracing::warn!(error = %err, "object skipped");
    }

    let trees: Vec<_> = snapshot
        .nodes()
        .iter()
        .map(|id| snapshot.graph.get_json(*id))
        .collect();
    let out = output::render_list(global.output, &trees, util::object_row, |t| {
        util::object_row(t).dn
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
