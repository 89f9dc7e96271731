//! `acikit watch <class>`: stream subscription events until interrupted.

use std::time::Duration;

use owo_colors::OwoColorize;

use acikit_core::{Controller, ControllerConfig, CoreError, EventStatus, MoEvent, SubscriptionEvent};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

/// Poll interval when no idle limit is set.
const WAIT: Duration = Duration::from_secs(3600);

pub async fn handle(
    mut config: ControllerConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    config.subscription_enabled = true;
    let controller = Controller::new(config);
    controller.connect().await?;

    let result = stream(&controller, &args, global).await;
    controller.disconnect().await;
    result
}

async fn stream(
    controller: &Controller,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let handle = controller
        .subscribe_class(&args.class_name, args.only_new)
        .await?;
    tracing::info!(%handle, class = %args.class_name, "watching");

    let color = output::should_color(global.color);
    let wait = args.idle.map_or(WAIT, Duration::from_secs);
    let mut seen = 0usize;

    loop {
        if args.count.is_some_and(|n| seen >= n) {
            break;
        }
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = controller.next_event(handle, wait) => event,
        };
        match event {
            Ok(SubscriptionEvent::Object(mo)) => {
                seen += 1;
                output::print_output(&format_event(&mo, global.output, color), global.quiet);
            }
            Ok(SubscriptionEvent::SubscriptionLost { generation }) => {
                eprintln!("notification channel reconnected (generation {generation}); events may have been missed");
            }
            Err(CoreError::Timeout { .. }) if args.idle.is_none() => {}
            Err(CoreError::Timeout { .. }) => break,
            Err(e) => return Err(e.into()),
        }
    }

    controller.unsubscribe(handle).await?;
    Ok(())
}

fn format_event(event: &MoEvent, format: OutputFormat, color: bool) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(event).unwrap_or_default(),
        OutputFormat::JsonCompact => serde_json::to_string(event).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(event).unwrap_or_default(),
        OutputFormat::Plain => event.dn.clone(),
        OutputFormat::Table => {
            let status = format!("{:<8}", event.status.to_string());
            let status = if color {
                match event.status {
                    EventStatus::Created => status.green().to_string(),
                    EventStatus::Modified => status.yellow().to_string(),
                    EventStatus::Deleted => status.red().to_string(),
                }
            } else {
                status
            };
            format!(
                "{} {status} {} {}",
                event.received_at.format("%H:%M:%S"),
                event.class_name,
                event.dn
            )
        }
    }
}
