//! Example bootstrapping an application from three extensions.

use extension_runtime::{
    DescriptorBuilder, ExtensionContext, ExtensionDescriptor, LifecycleEvent, Runtime,
    RuntimeConfig,
};

async fn init_logging(_ctx: ExtensionContext, descriptor: ExtensionDescriptor) -> extension_runtime::Result<()> {
    println!("  [logging] level = {}", descriptor.options["level"]);
    Ok(())
}

async fn init_database(ctx: ExtensionContext, _descriptor: ExtensionDescriptor) -> extension_runtime::Result<()> {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    ctx.settings().write().set("database.url", "postgres://localhost/demo");
    println!("  [database] connected");
    Ok(())
}

async fn init_router(ctx: ExtensionContext, descriptor: ExtensionDescriptor) -> extension_runtime::Result<()> {
    let url = ctx.settings().read().string("database.url").map(str::to_string);
    println!("  [router] port = {}, database = {:?}", descriptor.options["port"], url);

    let activated = ctx.activated().to_vec();
    ctx.defer(move || async move {
        println!("  [router] building routes for {:?}", activated);
        Ok(())
    });
    Ok(())
}

#[tokio::main]
async fn main() -> extension_runtime::Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== Extension Runtime Example ===\n");

    let config = RuntimeConfig::new()
        .with_option("router.port", 8080)
        .with_option("metrics.enabled", false);
    let mut runtime = Runtime::new(config);

    runtime.on_event(|event: &LifecycleEvent| {
        println!("event: {} {:?}", event.event_name(), event.extension_name());
    });

    runtime
        .register(
            DescriptorBuilder::new("router", init_router)
                .dependencies(["logging", "database"])
                .option("port", 80)
                .build()?,
        )
        .register(
            DescriptorBuilder::new("database", init_database)
                .dependency("logging")
                .build()?,
        )
        .register(
            DescriptorBuilder::new("logging", init_logging)
                .option("level", "debug")
                .build()?,
        )
        .register(
            DescriptorBuilder::new("metrics", init_logging)
                .option("level", "info")
                .build()?,
        );

    runtime.when_ready(|| println!("\nready callback fired"));

    println!("Starting...");
    runtime.start().await?;

    println!("\n=== Summary ===");
    println!("State: {}", runtime.state());
    println!("Activated: {:?}", runtime.orchestrator().activated());

    Ok(())
}
