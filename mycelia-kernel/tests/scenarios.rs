//! Integration tests for the six concrete scenarios the kernel's
//! testable properties describe: a plain protected send, a scope
//! denial, a one-shot request/reply round trip, a one-shot timeout,
//! queue overflow under `reject`, and kernel-child shared authority.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mycelia_kernel::{
    CapabilityRegistry, CreatePrincipalOptions, GrantLevel, HandlerOutcome, Kernel, KernelConfig,
    KernelError, Message, OverflowPolicy, PrincipalKind, ReplyOutcome, ResponseRequirement,
    RouteMetadata, ScopeRequirement, SendOptions, SendOutcome, SubsystemOptions,
};

fn ok_handler() -> mycelia_kernel::Handler {
    Arc::new(|_msg, _params, _opts| Box::pin(async { HandlerOutcome::Success(serde_json::json!({})) }))
}

#[tokio::test]
async fn simple_protected_send_returns_handler_result() {
    let kernel = Kernel::bootstrap_with_config(KernelConfig::default());
    kernel
        .register_subsystem("echo", SubsystemOptions { synchronous: true, ..Default::default() })
        .unwrap();
    kernel
        .register_route(
            "echo",
            "ping",
            Arc::new(|message: Message, _params, _opts| {
                Box::pin(async move {
                    HandlerOutcome::Success(serde_json::json!({ "ok": true, "n": message.body["n"] }))
                })
            }),
            RouteMetadata::default(),
        )
        .await
        .unwrap();

    let caller = kernel.create_principal(PrincipalKind::Friend, CreatePrincipalOptions::default());
    let message = Message::new("echo://ping", serde_json::json!({ "n": 1 })).unwrap();
    let outcome = kernel
        .send_protected(&caller, message, SendOptions::default())
        .await
        .unwrap();

    match outcome {
        SendOutcome::Processed(HandlerOutcome::Success(value)) => {
            assert_eq!(value["ok"], true);
            assert_eq!(value["n"], 1);
        }
        _ => panic!("expected a processed success outcome"),
    }
}

#[tokio::test]
async fn scope_denial_rejects_without_invoking_handler() {
    let kernel = Kernel::bootstrap_with_config(KernelConfig::default());
    kernel
        .register_subsystem("workspace", SubsystemOptions { synchronous: true, ..Default::default() })
        .unwrap();

    let invoked = Arc::new(AtomicBool::new(false));
    let invoked_flag = Arc::clone(&invoked);
    let mut metadata = RouteMetadata::default();
    metadata.required = Some(ScopeRequirement::Write);
    metadata.scope = Some("workspace:read".to_string());
    kernel
        .register_route(
            "workspace",
            "update",
            Arc::new(move |_msg, _params, _opts| {
                invoked_flag.store(true, Ordering::SeqCst);
                Box::pin(async { HandlerOutcome::Success(serde_json::json!({})) })
            }),
            metadata,
        )
        .await
        .unwrap();

    let mut grants = HashMap::new();
    grants.insert("workspace:read".to_string(), GrantLevel::R);
    kernel.profiles().create_profile("student", grants, None).unwrap();

    let student = kernel.create_principal(PrincipalKind::Friend, CreatePrincipalOptions::default());
    kernel.principals().set_role_for_pkr(&student, "student").unwrap();

    let message = Message::new("workspace://update", serde_json::json!({})).unwrap();
    let err = kernel
        .send_protected(&student, message, SendOptions::default())
        .await
        .unwrap_err();

    match err {
        KernelError::PermissionDenied { scope, .. } => assert_eq!(scope, "workspace:read"),
        other => panic!("expected permission denied, got {other}"),
    }
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn one_shot_request_settles_with_responders_reply() {
    let kernel = Kernel::bootstrap_with_config(KernelConfig::default());
    kernel.register_subsystem("worker", SubsystemOptions::default()).unwrap();

    let kernel_for_handler = Arc::clone(&kernel);
    kernel
        .register_route(
            "worker",
            "process",
            Arc::new(move |message: Message, _params, _opts| {
                let kernel = Arc::clone(&kernel_for_handler);
                Box::pin(async move {
                    if let Some(reply_to) = kernel.get_reply_to(message.id) {
                        if let Ok(mut response) =
                            Message::new(reply_to, serde_json::json!({ "result": "success" }))
                        {
                            response.meta.set_in_reply_to(message.id);
                            let responder = kernel
                                .create_principal(PrincipalKind::Friend, CreatePrincipalOptions::default());
                            let _ = kernel.send_protected(&responder, response, SendOptions::default()).await;
                        }
                    }
                    HandlerOutcome::Success(serde_json::json!({ "acknowledged": true }))
                })
            }),
            RouteMetadata::default(),
        )
        .await
        .unwrap();

    let caller = kernel.create_principal(PrincipalKind::Friend, CreatePrincipalOptions::default());
    let message = Message::new("worker://process", serde_json::json!({})).unwrap();
    let outcome = kernel
        .send_protected(
            &caller,
            message,
            SendOptions {
                response_required: Some(ResponseRequirement {
                    reply_channel: "friend://inbox".to_string(),
                    timeout: Some(Duration::from_millis(500)),
                }),
            },
        )
        .await
        .unwrap();
    let receiver = match outcome {
        SendOutcome::Awaiting(receiver) => receiver,
        _ => panic!("expected an awaiting one-shot receiver"),
    };

    kernel.global_scheduler().tick_once().await;

    match receiver.await {
        Ok(ReplyOutcome::Delivered(response)) => assert_eq!(response.body["result"], "success"),
        other => panic!("expected delivery, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn one_shot_timeout_settles_with_timed_out_and_clears_binding() {
    let kernel = Kernel::bootstrap_with_config(KernelConfig::default());
    kernel.register_subsystem("worker", SubsystemOptions::default()).unwrap();
    kernel
        .register_route("worker", "process", ok_handler(), RouteMetadata::default())
        .await
        .unwrap();

    let caller = kernel.create_principal(PrincipalKind::Friend, CreatePrincipalOptions::default());
    let message = Message::new("worker://process", serde_json::json!({})).unwrap();
    let message_id = message.id;
    let outcome = kernel
        .send_protected(
            &caller,
            message,
            SendOptions {
                response_required: Some(ResponseRequirement {
                    reply_channel: "friend://inbox".to_string(),
                    timeout: Some(Duration::from_millis(100)),
                }),
            },
        )
        .await
        .unwrap();
    let receiver = match outcome {
        SendOutcome::Awaiting(receiver) => receiver,
        _ => panic!("expected an awaiting one-shot receiver"),
    };

    tokio::time::advance(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;

    match receiver.await {
        Ok(ReplyOutcome::TimedOut) => {}
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(kernel.get_reply_to(message_id).is_none());
}

#[tokio::test]
async fn queue_overflow_rejects_then_recovers_after_drain() {
    let config = KernelConfig {
        queue_capacity: 2,
        overflow_policy: OverflowPolicy::Reject,
        time_slice_message_cap: 1,
        ..KernelConfig::default()
    };
    let kernel = Kernel::bootstrap_with_config(config);
    kernel.register_subsystem("worker", SubsystemOptions::default()).unwrap();
    kernel
        .register_route("worker", "process", ok_handler(), RouteMetadata::default())
        .await
        .unwrap();

    let caller = kernel.create_principal(PrincipalKind::Friend, CreatePrincipalOptions::default());

    let send = |n: i64| {
        let kernel = Arc::clone(&kernel);
        let caller = caller.clone();
        async move {
            let message = Message::new("worker://process", serde_json::json!({ "n": n })).unwrap();
            kernel.send_protected(&caller, message, SendOptions::default()).await
        }
    };

    assert!(matches!(send(1).await, Ok(SendOutcome::Enqueued)));
    assert!(matches!(send(2).await, Ok(SendOutcome::Enqueued)));
    assert!(matches!(send(3).await, Err(KernelError::QueueFull { .. })));

    kernel.global_scheduler().tick_once().await;

    assert!(matches!(send(4).await, Ok(SendOutcome::Enqueued)));
}

#[tokio::test]
async fn subsystem_build_plan_resolves_capabilities_in_dependency_order() {
    let kernel = Kernel::bootstrap_with_config(KernelConfig::default());

    let mut capabilities = CapabilityRegistry::new();
    capabilities.provide("base_limit", 10_i64).unwrap();
    capabilities
        .register::<i64, _>("doubled_limit", vec!["base_limit"], |ctx| {
            Ok(*ctx.try_get::<i64>("base_limit")? * 2)
        })
        .unwrap();

    let identity = kernel
        .register_subsystem_with_capabilities("limits", SubsystemOptions::default(), capabilities)
        .await
        .unwrap();
    assert!(kernel.principals().resolve_pkr(&identity).is_ok());

    let handle = kernel.get_subsystem("limits").unwrap();
    assert_eq!(*handle.capability::<i64>("doubled_limit").unwrap(), 20);
}

#[tokio::test]
async fn subsystem_build_plan_rejects_cyclic_capability_graph() {
    let kernel = Kernel::bootstrap_with_config(KernelConfig::default());

    let mut capabilities = CapabilityRegistry::new();
    capabilities
        .register::<i64, _>("a", vec!["b"], |ctx| Ok(*ctx.try_get::<i64>("b")?))
        .unwrap();
    capabilities
        .register::<i64, _>("b", vec!["a"], |ctx| Ok(*ctx.try_get::<i64>("a")?))
        .unwrap();

    let err = kernel
        .register_subsystem_with_capabilities("cyclic", SubsystemOptions::default(), capabilities)
        .await
        .unwrap_err();
    assert!(matches!(err, KernelError::CycleDetected { .. }));
    assert!(kernel.get_subsystem("cyclic").is_none());
}

#[tokio::test]
async fn plain_registration_leaves_capability_context_empty() {
    let kernel = Kernel::bootstrap_with_config(KernelConfig::default());
    kernel.register_subsystem("echo", SubsystemOptions::default()).unwrap();
    let handle = kernel.get_subsystem("echo").unwrap();
    assert!(handle.capability::<i64>("anything").is_none());
}

#[tokio::test]
async fn kernel_children_share_kernel_authority_with_distinct_public_keys() {
    let kernel = Kernel::bootstrap_with_config(KernelConfig::default());
    let children = kernel.children();
    let all = [
        &children.access_control,
        &children.error_manager,
        &children.response_manager,
        &children.channel_manager,
        &children.profile_registry,
    ];

    for child in &all {
        assert!(kernel.is_kernel(child));
        assert_eq!(
            kernel.principals().resolve_pkr(child).unwrap(),
            kernel.principals().kernel_private_key()
        );
    }

    let mut public_keys: Vec<_> = all.iter().map(|c| c.public_key).collect();
    public_keys.sort();
    public_keys.dedup();
    assert_eq!(public_keys.len(), all.len());
}
