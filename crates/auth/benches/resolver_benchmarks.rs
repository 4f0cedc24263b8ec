use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use gatehouse_auth::{
    AccessToken, AuthMode, CredentialStore, InMemoryCredentialStore, Permission,
    PermissionDefinition, RoleDefinition, TokenAuthenticator, TokenConfig, User, resolve,
};
use std::sync::Arc;

/// A user holding `roles` roles of `per_role` permissions each, where every
/// role overlaps half of its permissions with the previous one.
fn user_with_overlapping_roles(roles: usize, per_role: usize) -> User {
    let mut user = User::new("bench@example.com", None, String::new(), Utc::now()).unwrap();
    let step = (per_role / 2).max(1);
    user.roles = (0..roles)
        .map(|r| {
            let perms = (0..per_role)
                .map(|p| Permission::new(format!("perm-{}", r * step + p)))
                .collect();
            RoleDefinition::new(format!("role-{r}"), perms)
        })
        .collect();
    user.permissions = (0..per_role)
        .map(|p| PermissionDefinition::new(format!("perm-{p}")))
        .collect();
    user
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("permission_resolution");

    for (roles, per_role) in [(1, 10), (5, 20), (20, 50)] {
        let user = user_with_overlapping_roles(roles, per_role);
        let edges = (roles * per_role + per_role) as u64;
        group.throughput(Throughput::Elements(edges));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{roles}x{per_role}")),
            &user,
            |b, user| b.iter(|| resolve(black_box(user))),
        );
    }

    group.finish();
}

fn bench_authenticate(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let store = Arc::new(InMemoryCredentialStore::new());
    let user = User::new("bench@example.com", None, String::new(), Utc::now()).unwrap();
    let token = AccessToken::mint(user.id, Utc::now(), chrono::Duration::hours(10));
    runtime.block_on(async {
        store.insert_user(&user).await.unwrap();
        store.insert_token(&token).await.unwrap();
    });

    let authenticator = TokenAuthenticator::new(store, TokenConfig::default());
    let header = format!("Bearer {}", token.secret.as_str());

    let mut group = c.benchmark_group("authenticate");
    group.bench_function("required_valid_token", |b| {
        b.iter(|| {
            runtime
                .block_on(authenticator.authenticate(Some(black_box(header.as_str())), AuthMode::Required))
                .unwrap()
        })
    });
    group.bench_function("optional_missing_header", |b| {
        b.iter(|| {
            runtime
                .block_on(authenticator.authenticate(None, AuthMode::Optional))
                .unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_resolve, bench_authenticate);
criterion_main!(benches);
