//! # Workflow Orchestration
//!
//! Authorization, atomic in-memory commit, and database write-through for
//! every state-changing operation. Route handlers only parse requests and
//! call into this module.
//!
//! ## Commit protocol
//!
//! 1. Authorize the caller and take the entity's commit lock
//!    ([`Store::lock_commits`]).
//! 2. Under the store's write lock: load, validate against the transition
//!    table or ledger, mutate, and append the timeline entry. A rejection
//!    leaves the record untouched.
//! 3. Write through to Postgres with the prior value in the `WHERE` clause.
//!    Zero rows affected is a conflict (409), a database error is a 500; in
//!    both cases the in-memory change is rolled back before the commit lock
//!    is released, so no other commit can build on it.

use std::future::Future;

use uuid::Uuid;

use kc_core::{
    ConsultationId, DoctorId, KitOrderId, KitQuote, Money, PriceCalculator, SubscriptionId,
    Timestamp, UserId, KIT_BASE_PRICE_KEY, KIT_SHIPPING_FEE_KEY,
};
use kc_state::{
    Appointment, ConsultationRequest, ConsultationStatus, DeliveryInfo, KitOrder, KitOrderStatus,
    KitPurchase, PurchaseType, SchedulePreferences, Subscription, SubscriptionTier, WorkflowState,
};

use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::state::{AppState, CommitGuard, PartnerDoctor, Store};

// -- Write-through --------------------------------------------------------------

/// Persist an in-memory commit, rolling it back if the database refuses it.
/// The caller holds the commit lock for `id`.
async fn write_through<T, F>(
    store: &Store<T>,
    id: Uuid,
    previous: T,
    committed: &T,
    what: &'static str,
    persist: F,
) -> Result<(), AppError>
where
    T: Clone + Send + Sync + PartialEq,
    F: Future<Output = Result<bool, sqlx::Error>>,
{
    match persist.await {
        Ok(true) => Ok(()),
        Ok(false) => {
            rollback(store, id, committed, previous, what);
            tracing::warn!(%id, entity = what, "optimistic write lost: row changed concurrently");
            Err(AppError::Conflict(format!(
                "{what} {id} was modified concurrently; retry the request"
            )))
        }
        Err(e) => {
            rollback(store, id, committed, previous, what);
            tracing::error!(%id, entity = what, error = %e, "failed to persist change to database");
            Err(AppError::Internal(format!(
                "{what} change could not be persisted"
            )))
        }
    }
}

fn rollback<T>(store: &Store<T>, id: Uuid, committed: &T, previous: T, what: &'static str)
where
    T: Clone + Send + Sync + PartialEq,
{
    if !store.restore_if_unchanged(&id, committed, previous) {
        tracing::error!(%id, entity = what, "rollback skipped: record changed outside its commit lock");
    }
}

/// Persist a newly inserted record, removing it from memory on failure.
async fn insert_through<T, F>(store: &Store<T>, id: Uuid, what: &'static str, persist: F) -> Result<(), AppError>
where
    T: Clone + Send + Sync,
    F: Future<Output = Result<(), sqlx::Error>>,
{
    if let Err(e) = persist.await {
        store.remove(&id);
        tracing::error!(%id, entity = what, error = %e, "failed to persist new record to database");
        return Err(AppError::Internal(format!(
            "{what} recorded in-memory but database persist failed"
        )));
    }
    Ok(())
}

// -- Pricing --------------------------------------------------------------------

/// Current one-time kit price.
pub fn kit_price(state: &AppState) -> Result<Money, AppError> {
    Ok(kit_quote(state)?.total)
}

/// Current kit price with its components, all from one settings read.
pub fn kit_quote(state: &AppState) -> Result<KitQuote, AppError> {
    let settings = state
        .settings
        .read_together(&[KIT_BASE_PRICE_KEY, KIT_SHIPPING_FEE_KEY]);
    Ok(PriceCalculator::kit_quote(&settings)?)
}

/// Current price of a subscription tier.
pub fn tier_price(state: &AppState, tier: SubscriptionTier) -> Result<Money, AppError> {
    Ok(PriceCalculator::amount(&state.settings, &tier.price_setting_key())?)
}

/// Update a setting (admin). The next price read observes the new value.
pub async fn update_setting(
    state: &AppState,
    caller: &CallerIdentity,
    key: &str,
    value: Money,
) -> Result<(), AppError> {
    require_role(caller, Role::Admin)?;
    state
        .settings
        .set(state.db_pool.as_ref(), key, value)
        .await
        .map_err(|e| {
            tracing::error!(key, error = %e, "failed to persist setting");
            AppError::Internal("setting could not be persisted".to_string())
        })?;
    tracing::info!(key, value = %value, "setting updated");
    Ok(())
}

// -- Kit orders -----------------------------------------------------------------

/// Admins may perform every table transition. A client may only start the
/// return of their own delivered kit.
fn authorize_kit_transition(
    caller: &CallerIdentity,
    order: &KitOrder,
    requested: KitOrderStatus,
) -> Result<(), AppError> {
    if caller.is_admin() {
        return Ok(());
    }
    if !caller.can_access(order.user_id) {
        return Err(AppError::NotFound(format!("kit order {} not found", order.id)));
    }
    if requested == KitOrderStatus::Returning {
        return Ok(());
    }
    Err(AppError::Forbidden(format!(
        "clients may not move kit orders to {requested}"
    )))
}

/// Apply a kit order status change.
pub async fn apply_kit_order_transition(
    state: &AppState,
    id: KitOrderId,
    requested: KitOrderStatus,
    caller: &CallerIdentity,
) -> Result<KitOrder, AppError> {
    let pool = state.db_pool.clone();
    transition_kit_order_with(state, id, requested, caller, move |updated, from| async move {
        match pool {
            Some(pool) => crate::db::kit_orders::update_status(&pool, &updated, from).await,
            None => Ok(true),
        }
    })
    .await
}

async fn transition_kit_order_with<P, Fut>(
    state: &AppState,
    id: KitOrderId,
    requested: KitOrderStatus,
    caller: &CallerIdentity,
    persist: P,
) -> Result<KitOrder, AppError>
where
    P: FnOnce(KitOrder, KitOrderStatus) -> Fut,
    Fut: Future<Output = Result<bool, sqlx::Error>>,
{
    let _commit = state.kit_orders.lock_commits(*id.as_uuid()).await;
    let outcome = state
        .kit_orders
        .try_update(id.as_uuid(), |order| -> Result<_, AppError> {
            authorize_kit_transition(caller, order, requested)?;
            let previous = order.clone();
            let change = order.transition(requested, Timestamp::now())?;
            Ok((previous, order.clone(), change))
        })
        .ok_or_else(|| AppError::NotFound(format!("kit order {id} not found")))?;

    let (previous, updated, change) = match outcome {
        Ok(committed) => committed,
        Err(e) => {
            if matches!(e, AppError::Validation(_)) {
                state.metrics.record_transition_rejected();
                tracing::warn!(kit_order_id = %id, requested = %requested, error = %e, "kit order transition rejected");
            }
            return Err(e);
        }
    };

    write_through(
        &state.kit_orders,
        *id.as_uuid(),
        previous,
        &updated,
        "kit order",
        persist(updated.clone(), change.from),
    )
    .await?;

    state.metrics.record_transition_accepted();
    tracing::info!(
        kit_order_id = %id,
        from = %change.from,
        to = %change.to,
        actor = caller.role.as_str(),
        "kit order transition applied"
    );
    Ok(updated)
}

/// Client-initiated return: `out_for_delivery → returning` on an own order.
pub async fn initiate_return(
    state: &AppState,
    id: KitOrderId,
    caller: &CallerIdentity,
) -> Result<KitOrder, AppError> {
    apply_kit_order_transition(state, id, KitOrderStatus::Returning, caller).await
}

/// Request to create a kit order.
#[derive(Debug, Clone)]
pub struct NewKitOrder {
    pub user_id: UserId,
    pub purchase_type: PurchaseType,
    pub delivery: DeliveryInfo,
}

/// Create a kit order. Subscription-funded orders consume one kit from the
/// user's active subscription; one-time orders are priced from settings.
pub async fn create_kit_order(
    state: &AppState,
    caller: &CallerIdentity,
    request: NewKitOrder,
) -> Result<KitOrder, AppError> {
    let pool = state.db_pool.clone();
    create_kit_order_with(state, caller, request, move |order| async move {
        match pool {
            Some(pool) => crate::db::kit_orders::insert(&pool, &order).await,
            None => Ok(()),
        }
    })
    .await
}

async fn create_kit_order_with<P, Fut>(
    state: &AppState,
    caller: &CallerIdentity,
    request: NewKitOrder,
    persist: P,
) -> Result<KitOrder, AppError>
where
    P: FnOnce(KitOrder) -> Fut,
    Fut: Future<Output = Result<(), sqlx::Error>>,
{
    if !caller.can_access(request.user_id) {
        return Err(AppError::Forbidden(
            "clients may only order kits for themselves".to_string(),
        ));
    }

    let now = Timestamp::now();
    // Held until the order row exists, so a failed insert can hand the kit back.
    let _ledger_commit = match request.purchase_type {
        PurchaseType::Subscription => Some(state.subscriptions.lock_commits(*request.user_id.as_uuid()).await),
        PurchaseType::OneTime => None,
    };
    let (purchase, consumed) = match request.purchase_type {
        PurchaseType::OneTime => (
            KitPurchase::OneTime {
                price: kit_price(state)?,
            },
            None,
        ),
        PurchaseType::Subscription => {
            let (previous, updated) = consume_active_entitlement(state, request.user_id, now).await?;
            let purchase = KitPurchase::Subscription {
                subscription_id: updated.id,
            };
            (purchase, Some((previous, updated)))
        }
    };

    let order = KitOrder::new(request.user_id, purchase, request.delivery, now);
    let id = *order.id.as_uuid();
    state.kit_orders.insert(id, order.clone());

    if let Err(e) = insert_through(&state.kit_orders, id, "kit order", persist(order.clone())).await {
        if let Some((previous, updated)) = consumed {
            refund_entitlement(state, previous, &updated).await;
        }
        return Err(e);
    }

    if let Some((_, subscription)) = &consumed {
        state.metrics.record_kit_consumed();
        tracing::info!(
            subscription_id = %subscription.id,
            kits_used = subscription.kits_used,
            kits_allowed = subscription.kits_allowed,
            "kit entitlement consumed"
        );
    }
    tracing::info!(
        kit_order_id = %order.id,
        user_id = %order.user_id,
        purchase_type = order.purchase_type.as_str(),
        price = %order.price,
        "kit order created"
    );
    Ok(order)
}

// -- Consultations ----------------------------------------------------------------

/// Create a consultation request, recording the tier of the client's active
/// subscription if any.
pub async fn create_consultation(
    state: &AppState,
    caller: &CallerIdentity,
    user_id: UserId,
    preferences: SchedulePreferences,
) -> Result<ConsultationRequest, AppError> {
    if !caller.can_access(user_id) {
        return Err(AppError::Forbidden(
            "clients may only book consultations for themselves".to_string(),
        ));
    }
    let now = Timestamp::now();
    let tier = get_active_subscription(state, user_id, now).map(|s| s.tier.as_str().to_string());
    let consultation = ConsultationRequest::new(user_id, preferences, tier, now);
    let id = *consultation.id.as_uuid();
    state.consultations.insert(id, consultation.clone());

    if let Some(pool) = &state.db_pool {
        insert_through(
            &state.consultations,
            id,
            "consultation",
            crate::db::consultations::insert(pool, &consultation),
        )
        .await?;
    }

    tracing::info!(consultation_id = %consultation.id, user_id = %user_id, "consultation requested");
    Ok(consultation)
}

/// Ensure a doctor exists and accepts new assignments.
fn check_assignable_doctor(state: &AppState, doctor_id: DoctorId) -> Result<(), AppError> {
    match state.doctors.get(doctor_id.as_uuid()) {
        Some(doctor) if doctor.active => Ok(()),
        Some(_) => Err(AppError::Validation(format!(
            "partner doctor {doctor_id} is inactive"
        ))),
        None => Err(AppError::NotFound(format!(
            "partner doctor {doctor_id} not found"
        ))),
    }
}

/// Apply a consultation status change (admin), optionally setting the
/// appointment when confirming.
pub async fn apply_consultation_transition(
    state: &AppState,
    id: ConsultationId,
    requested: ConsultationStatus,
    appointment: Appointment,
    caller: &CallerIdentity,
) -> Result<ConsultationRequest, AppError> {
    require_role(caller, Role::Admin)?;
    if let Some(doctor_id) = appointment.doctor_id {
        check_assignable_doctor(state, doctor_id)?;
    }

    let _commit = state.consultations.lock_commits(*id.as_uuid()).await;
    let outcome = state
        .consultations
        .try_update(id.as_uuid(), |consultation| -> Result<_, AppError> {
            let previous = consultation.clone();
            let change = consultation.transition(requested, appointment, Timestamp::now())?;
            Ok((previous, consultation.clone(), change))
        })
        .ok_or_else(|| AppError::NotFound(format!("consultation {id} not found")))?;

    let (previous, updated, change) = match outcome {
        Ok(committed) => committed,
        Err(e) => {
            state.metrics.record_transition_rejected();
            tracing::warn!(consultation_id = %id, requested = %requested, error = %e, "consultation transition rejected");
            return Err(e);
        }
    };

    if let Some(pool) = &state.db_pool {
        write_through(
            &state.consultations,
            *id.as_uuid(),
            previous,
            &updated,
            "consultation",
            crate::db::consultations::update(pool, &updated, change.from),
        )
        .await?;
    }

    state.metrics.record_transition_accepted();
    tracing::info!(
        consultation_id = %id,
        from = %change.from,
        to = %change.to,
        actor = caller.role.as_str(),
        "consultation transition applied"
    );
    Ok(updated)
}

/// Assign a partner doctor without changing status (admin).
pub async fn assign_doctor(
    state: &AppState,
    id: ConsultationId,
    doctor_id: DoctorId,
    caller: &CallerIdentity,
) -> Result<ConsultationRequest, AppError> {
    require_role(caller, Role::Admin)?;
    check_assignable_doctor(state, doctor_id)?;

    let _commit = state.consultations.lock_commits(*id.as_uuid()).await;
    let (previous, updated) = state
        .consultations
        .try_update(id.as_uuid(), |consultation| -> Result<_, AppError> {
            let previous = consultation.clone();
            consultation.assign_doctor(doctor_id, Timestamp::now())?;
            Ok((previous, consultation.clone()))
        })
        .ok_or_else(|| AppError::NotFound(format!("consultation {id} not found")))??;

    if let Some(pool) = &state.db_pool {
        write_through(
            &state.consultations,
            *id.as_uuid(),
            previous.clone(),
            &updated,
            "consultation",
            crate::db::consultations::update(pool, &updated, previous.status),
        )
        .await?;
    }

    tracing::info!(consultation_id = %id, doctor_id = %doctor_id, "partner doctor assigned");
    Ok(updated)
}

// -- Partner doctors ----------------------------------------------------------------

/// Register a partner doctor (admin).
pub async fn create_doctor(
    state: &AppState,
    caller: &CallerIdentity,
    name: String,
    specialty: Option<String>,
) -> Result<PartnerDoctor, AppError> {
    require_role(caller, Role::Admin)?;
    let doctor = PartnerDoctor {
        id: Uuid::new_v4(),
        name,
        specialty,
        active: true,
        created_at: *Timestamp::now().as_datetime(),
    };
    state.doctors.insert(doctor.id, doctor.clone());

    if let Some(pool) = &state.db_pool {
        insert_through(
            &state.doctors,
            doctor.id,
            "partner doctor",
            crate::db::doctors::insert(pool, &doctor),
        )
        .await?;
    }

    tracing::info!(doctor_id = %doctor.id, name = %doctor.name, "partner doctor registered");
    Ok(doctor)
}

/// Stop assigning new consultations to a doctor (admin). Existing
/// assignments are kept. Deactivating an inactive doctor is a no-op.
pub async fn deactivate_doctor(
    state: &AppState,
    caller: &CallerIdentity,
    id: DoctorId,
) -> Result<PartnerDoctor, AppError> {
    require_role(caller, Role::Admin)?;
    let _commit = state.doctors.lock_commits(*id.as_uuid()).await;

    let (previous, updated) = state
        .doctors
        .try_update(id.as_uuid(), |doctor| -> Result<_, AppError> {
            let previous = doctor.clone();
            doctor.active = false;
            Ok((previous, doctor.clone()))
        })
        .ok_or_else(|| AppError::NotFound(format!("partner doctor {id} not found")))??;

    if !previous.active {
        return Ok(updated);
    }

    if let Some(pool) = &state.db_pool {
        write_through(
            &state.doctors,
            *id.as_uuid(),
            previous,
            &updated,
            "partner doctor",
            crate::db::doctors::deactivate(pool, *id.as_uuid()),
        )
        .await?;
    }

    tracing::info!(doctor_id = %id, "partner doctor deactivated");
    Ok(updated)
}

// -- Subscriptions ------------------------------------------------------------------

/// Pick the most recently created subscription that can fund a kit.
fn select_active<'a>(
    subscriptions: impl Iterator<Item = &'a Subscription>,
    user_id: UserId,
    now: Timestamp,
) -> Option<&'a Subscription> {
    subscriptions
        .filter(|s| s.user_id == user_id && s.is_active_at(now) && s.has_remaining_kits())
        .max_by_key(|s| s.created_at)
}

/// The user's active subscription with remaining kits, most recent first.
pub fn get_active_subscription(state: &AppState, user_id: UserId, now: Timestamp) -> Option<Subscription> {
    let candidates = state.subscriptions.filter(|s| s.user_id == user_id);
    select_active(candidates.iter(), user_id, now).cloned()
}

/// Open a subscription. Rejected with a conflict while the user already has
/// an active subscription with remaining kits. The check and the insert run
/// under one write lock.
pub async fn create_subscription(
    state: &AppState,
    caller: &CallerIdentity,
    user_id: UserId,
    tier: SubscriptionTier,
) -> Result<Subscription, AppError> {
    if !caller.can_access(user_id) {
        return Err(AppError::Forbidden(
            "clients may only subscribe for themselves".to_string(),
        ));
    }
    let price = tier_price(state, tier)?;
    let _commit = state.subscriptions.lock_commits(*user_id.as_uuid()).await;
    let now = Timestamp::now();

    let subscription = state.subscriptions.with_write(|map| {
        if let Some(existing) = select_active(map.values(), user_id, now) {
            return Err(AppError::Conflict(format!(
                "user {user_id} already has active subscription {} with {} kit(s) remaining",
                existing.id,
                existing.remaining_kits()
            )));
        }
        let subscription = Subscription::new(user_id, tier, price, now);
        map.insert(*subscription.id.as_uuid(), subscription.clone());
        Ok(subscription)
    })?;

    if let Some(pool) = &state.db_pool {
        insert_through(
            &state.subscriptions,
            *subscription.id.as_uuid(),
            "subscription",
            crate::db::subscriptions::insert(pool, &subscription),
        )
        .await?;
    }

    tracing::info!(
        subscription_id = %subscription.id,
        user_id = %user_id,
        tier = tier.as_str(),
        kits_allowed = subscription.kits_allowed,
        "subscription created"
    );
    Ok(subscription)
}

/// Persist a ledger change made in memory.
async fn persist_ledger(state: &AppState, previous: Subscription, updated: &Subscription) -> Result<(), AppError> {
    if let Some(pool) = &state.db_pool {
        let (prev_kits_used, prev_status) = (previous.kits_used, previous.status);
        write_through(
            &state.subscriptions,
            *updated.id.as_uuid(),
            previous,
            updated,
            "subscription",
            crate::db::subscriptions::update_ledger(pool, updated, prev_kits_used, prev_status),
        )
        .await?;
    }
    Ok(())
}

/// Give back a kit whose order could not be recorded. The caller still
/// holds the user's ledger commit lock.
async fn refund_entitlement(state: &AppState, previous: Subscription, consumed: &Subscription) {
    let id = *consumed.id.as_uuid();
    rollback(&state.subscriptions, id, consumed, previous.clone(), "subscription");

    if let Some(pool) = &state.db_pool {
        match crate::db::subscriptions::update_ledger(pool, &previous, consumed.kits_used, consumed.status).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!(subscription_id = %id, "kit refund not persisted: ledger row changed");
            }
            Err(e) => {
                tracing::error!(subscription_id = %id, error = %e, "kit refund not persisted");
            }
        }
    }
    tracing::warn!(
        subscription_id = %id,
        kits_used = previous.kits_used,
        "kit entitlement refunded after failed order insert"
    );
}

/// Consume one kit from the user's active subscription, choosing and
/// consuming under a single write lock. The caller holds the user's ledger
/// commit lock and records the consumption once the order exists.
async fn consume_active_entitlement(
    state: &AppState,
    user_id: UserId,
    now: Timestamp,
) -> Result<(Subscription, Subscription), AppError> {
    let (previous, updated) = state.subscriptions.with_write(|map| -> Result<_, AppError> {
        let id = select_active(map.values(), user_id, now)
            .map(|s| *s.id.as_uuid())
            .ok_or_else(|| {
                AppError::EntitlementExhausted(format!(
                    "user {user_id} has no active subscription with kits remaining"
                ))
            })?;
        let subscription = map
            .get_mut(&id)
            .ok_or_else(|| AppError::Internal("selected subscription vanished".to_string()))?;
        let previous = subscription.clone();
        subscription.use_kit(now)?;
        Ok((previous, subscription.clone()))
    })?;

    persist_ledger(state, previous.clone(), &updated).await?;
    Ok((previous, updated))
}

/// Take the ledger commit lock for the owner of subscription `id`.
async fn lock_ledger_of(state: &AppState, id: SubscriptionId) -> Result<CommitGuard, AppError> {
    let owner = state
        .subscriptions
        .get(id.as_uuid())
        .map(|s| s.user_id)
        .ok_or_else(|| AppError::NotFound(format!("subscription {id} not found")))?;
    Ok(state.subscriptions.lock_commits(*owner.as_uuid()).await)
}

/// Consume one kit from a specific subscription (owner or admin).
pub async fn use_kit(
    state: &AppState,
    id: SubscriptionId,
    caller: &CallerIdentity,
) -> Result<Subscription, AppError> {
    let _commit = lock_ledger_of(state, id).await?;
    let outcome = state
        .subscriptions
        .try_update(id.as_uuid(), |subscription| -> Result<_, AppError> {
            if !caller.can_access(subscription.user_id) {
                return Err(AppError::NotFound(format!("subscription {id} not found")));
            }
            let previous = subscription.clone();
            subscription.use_kit(Timestamp::now())?;
            Ok((previous, subscription.clone()))
        })
        .ok_or_else(|| AppError::NotFound(format!("subscription {id} not found")))?;

    let (previous, updated) = match outcome {
        Ok(committed) => committed,
        Err(e) => {
            if matches!(e, AppError::EntitlementExhausted(_)) {
                tracing::warn!(subscription_id = %id, error = %e, "kit entitlement refused");
            }
            return Err(e);
        }
    };

    persist_ledger(state, previous, &updated).await?;
    state.metrics.record_kit_consumed();
    tracing::info!(
        subscription_id = %id,
        kits_used = updated.kits_used,
        kits_allowed = updated.kits_allowed,
        "kit entitlement consumed"
    );
    Ok(updated)
}

/// Cancel a subscription (owner or admin).
pub async fn cancel_subscription(
    state: &AppState,
    id: SubscriptionId,
    caller: &CallerIdentity,
) -> Result<Subscription, AppError> {
    let _commit = lock_ledger_of(state, id).await?;
    let (previous, updated) = state
        .subscriptions
        .try_update(id.as_uuid(), |subscription| -> Result<_, AppError> {
            if !caller.can_access(subscription.user_id) {
                return Err(AppError::NotFound(format!("subscription {id} not found")));
            }
            let previous = subscription.clone();
            subscription.cancel(Timestamp::now())?;
            Ok((previous, subscription.clone()))
        })
        .ok_or_else(|| AppError::NotFound(format!("subscription {id} not found")))??;

    persist_ledger(state, previous, &updated).await?;
    tracing::info!(subscription_id = %id, actor = caller.role.as_str(), "subscription cancelled");
    Ok(updated)
}

/// Read a subscription (owner or admin), marking it expired first if its
/// annual term has ended.
pub async fn read_subscription(
    state: &AppState,
    id: SubscriptionId,
    caller: &CallerIdentity,
) -> Result<Subscription, AppError> {
    let _commit = lock_ledger_of(state, id).await?;
    let (previous, current, expired) = state
        .subscriptions
        .try_update(id.as_uuid(), |subscription| -> Result<_, AppError> {
            if !caller.can_access(subscription.user_id) {
                return Err(AppError::NotFound(format!("subscription {id} not found")));
            }
            let previous = subscription.clone();
            let expired = subscription.expire_if_due(Timestamp::now());
            Ok((previous, subscription.clone(), expired))
        })
        .ok_or_else(|| AppError::NotFound(format!("subscription {id} not found")))??;

    if expired {
        persist_ledger(state, previous, &current).await?;
        tracing::info!(subscription_id = %id, "subscription expired");
    }
    Ok(current)
}

// -- Reads ----------------------------------------------------------------------------

/// Read a kit order (owner or admin).
pub fn read_kit_order(state: &AppState, id: KitOrderId, caller: &CallerIdentity) -> Result<KitOrder, AppError> {
    state
        .kit_orders
        .get(id.as_uuid())
        .filter(|order| caller.can_access(order.user_id))
        .ok_or_else(|| AppError::NotFound(format!("kit order {id} not found")))
}

/// Read a consultation (owner or admin).
pub fn read_consultation(
    state: &AppState,
    id: ConsultationId,
    caller: &CallerIdentity,
) -> Result<ConsultationRequest, AppError> {
    state
        .consultations
        .get(id.as_uuid())
        .filter(|c| caller.can_access(c.user_id))
        .ok_or_else(|| AppError::NotFound(format!("consultation {id} not found")))
}

/// Whether a kit order's timeline replays cleanly through the table.
pub fn kit_order_timeline_consistent(order: &KitOrder) -> bool {
    order.timeline.replay_is_consistent::<KitOrderStatus>()
        && order.timeline.last().map(|e| e.label.as_str()) == Some(order.status.as_str())
}
