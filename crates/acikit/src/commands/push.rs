//! `acikit push <file>`: POST an object tree.

use acikit_core::{Controller, ControllerConfig};

use crate::cli::{GlobalOpts, PushArgs};
use crate::error::CliError;

use super::util;

pub async fn handle(
    config: ControllerConfig,
    args: PushArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let tree = util::read_tree_file(&args.file)?;
    let row = util::object_row(&tree);
    let parent_dn = args.parent_dn;

    let resp = Controller::oneshot(config, |controller| async move {
        controller.push_json(&parent_dn, &tree).await
    })
    .await?;

    if !resp.is_ok() {
        let fault = resp.fault();
        return Err(CliError::Rejected {
            status: resp.status,
            code: fault
                .as_ref()
                .and_then(|f| f.code.clone())
                .unwrap_or_default(),
            message: fault.map_or_else(|| resp.text.clone(), |f| f.text),
        });
    }

    if !global.quiet {
        eprintln!("Pushed {} {}", row.class, row.name);
    }
    Ok(())
}
