//! Built-in actions served by `wirecall-rpc serve`.

use serde_json::Value;
use std::time::Instant;
use wirecall::{Action, ActionRegistry, ErrorLogFilter, ServiceUnit, WirecallError};

/// Host-level information shared by the system actions.
struct HostInfo {
    started: Instant,
}

/// Registry with the system service and the error-log filter installed.
pub fn build_registry() -> wirecall::Result<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    registry.add_global_filter(ErrorLogFilter);
    registry.register_service(system_service()?)?;
    Ok(registry)
}

fn system_service() -> wirecall::Result<ServiceUnit> {
    let host = std::sync::Arc::new(HostInfo {
        started: Instant::now(),
    });

    Ok(ServiceUnit::new("SystemService")
        .action(
            Action::builder("Ping")
                .returns::<String>()
                .handler(|_ctx, _args| async move { Ok::<_, WirecallError>("pong") })
                .build()?,
        )
        .action(
            Action::builder("Echo")
                .param::<Value>()
                .returns::<Value>()
                .handler(|_ctx, args| async move { args.get::<Value>(0) })
                .build()?,
        )
        .action(
            Action::builder("GetVersion")
                .returns::<String>()
                .handler(|_ctx, _args| async move {
                    Ok::<_, WirecallError>(env!("CARGO_PKG_VERSION"))
                })
                .build()?,
        )
        .action(
            Action::builder("Sum")
                .param::<Vec<f64>>()
                .returns::<f64>()
                .handler(|_ctx, args| async move {
                    let values: Vec<f64> = args.get(0)?;
                    Ok::<_, WirecallError>(values.iter().sum::<f64>())
                })
                .build()?,
        )
        .action(
            Action::builder("Uptime")
                .returns::<u64>()
                .bind(host, |host, _ctx, _args| async move {
                    Ok::<_, WirecallError>(host.started.elapsed().as_secs())
                })
                .build()?,
        )
        .action(
            Action::builder("ListActions")
                .returns::<Vec<String>>()
                .handler(|ctx, _args| async move {
                    let names: Vec<String> = ctx
                        .session()
                        .registry()
                        .names()
                        .into_iter()
                        .map(String::from)
                        .collect();
                    Ok::<_, WirecallError>(names)
                })
                .build()?,
        )
        .action(
            Action::builder("CountPeers")
                .returns::<usize>()
                .handler(|ctx, _args| async move {
                    Ok::<_, WirecallError>(ctx.peers().len())
                })
                .build()?,
        ))
}
