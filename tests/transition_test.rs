// ==========================================
// 货柜状态转换集成测试
// ==========================================
// 覆盖: 全流程 NEW → COMPLETED、非法转换、重复请求、
//       取消、批次部分失败、按状态名重放
// ==========================================


#[cfg(test)]
mod transition_test {
    use supply_trace::domain::supply::Supply;
    use supply_trace::domain::types::{MarkStatus, Resolved, SupplyStatus};
    use supply_trace::engine::{FailureKind, SupplyNotice, TransitionEffect, TransitionPayload};

    use crate::test_helpers::{
        admit_supply, known, owner, p17, p78, receipt_events, seed_marks, setup_env, TestEnv,
    };

    const DECLARATION: &str = "10702020/011024/0001234";

    fn to(env: &TestEnv, supply_id: &str, target: SupplyStatus) -> Vec<String> {
        let payload = TransitionPayload::by("alice").with_declaration(DECLARATION);
        let report = env
            .state
            .transitions
            .apply_transitions(&[supply_id.to_string()], target, &payload);
        report.failed_ids()
    }

    fn status_of(env: &TestEnv, supply_id: &str) -> SupplyStatus {
        env.state
            .supply_repo
            .find_by_id(supply_id)
            .unwrap()
            .unwrap()
            .status
    }

    /// 已完成分配的新货柜
    fn allocated_supply(env: &TestEnv, container: &str, quantity: u32) -> (Supply, Vec<String>) {
        let marks = seed_marks(env, known(p78()), &owner(), quantity as usize);
        let supply = admit_supply(env, container, known(p78()), quantity);
        env.drain();
        env.advance_and_drain(30);
        (supply, marks)
    }

    // ==========================================
    // 全流程
    // ==========================================

    #[test]
    fn test_full_lifecycle_releases_marks_on_completion() {
        let env = setup_env();
        let (supply, marks) = allocated_supply(&env, "MSKU1000001", 2);
        let id = supply.supply_id.clone();

        assert!(to(&env, &id, SupplyStatus::Clearance).is_empty());
        let stored = env.state.supply_repo.find_by_id(&id).unwrap().unwrap();
        assert_eq!(stored.invariable.declaration_number.as_deref(), Some(DECLARATION));

        // CLEARED: 每个关联码写入报关单号
        assert!(to(&env, &id, SupplyStatus::Cleared).is_empty());
        env.drain();
        for mark_id in &marks {
            let mark = env.state.mark_repo.find_by_id(mark_id).unwrap().unwrap();
            assert_eq!(mark.comment.as_deref(), Some(DECLARATION));
        }

        // DELIVERY: 每行一个入库申请
        assert!(to(&env, &id, SupplyStatus::Delivery).is_empty());
        env.drain();
        let requests = env.gateway.all();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].reference, supply.reference());
        assert_eq!(requests[0].quantity, 2);
        assert_eq!(requests[0].product, p78());

        // 收货 → COMPLETED → 释放到流通（同一轮级联完成）
        for event in receipt_events(&env) {
            assert!(env.state.supply_api.receive_goods_event(event).unwrap());
        }
        env.drain();

        assert_eq!(status_of(&env, &id), SupplyStatus::Completed);
        for mark_id in &marks {
            let mark = env.state.mark_repo.find_by_id(mark_id).unwrap().unwrap();
            assert_eq!(mark.status, MarkStatus::New);
            assert!(mark.supply_id.is_none());
            assert!(mark.link_invariant_holds());
        }

        let statuses: Vec<SupplyStatus> = env
            .state
            .supply_repo
            .history(&id)
            .unwrap()
            .into_iter()
            .map(|v| v.status)
            .collect();
        assert_eq!(statuses.first(), Some(&SupplyStatus::New));
        assert_eq!(statuses.last(), Some(&SupplyStatus::Completed));
        for expected in [SupplyStatus::Clearance, SupplyStatus::Cleared, SupplyStatus::Delivery] {
            assert!(statuses.contains(&expected));
        }

        let hidden = SupplyNotice::Hidden { supply_id: id.clone() };
        assert_eq!(env.notifier.count(&hidden), 4);
    }

    #[test]
    fn test_completion_waits_for_every_line() {
        let env = setup_env();
        seed_marks(&env, known(p78()), &owner(), 1);
        seed_marks(&env, known(p17()), &owner(), 1);

        let mut supply = Supply::new("MSKU1000002", owner());
        supply.add_line(known(p78()), Some("78".to_string()), 1);
        supply.add_line(known(p17()), Some("4600000000017".to_string()), 1);
        env.state.allocation.admit(&mut supply, "test").unwrap();
        env.drain();
        env.advance_and_drain(30);

        let id = supply.supply_id.clone();
        for target in [SupplyStatus::Clearance, SupplyStatus::Cleared, SupplyStatus::Delivery] {
            assert!(to(&env, &id, target).is_empty());
        }
        env.drain();

        let events = receipt_events(&env);
        assert_eq!(events.len(), 2);

        env.state.supply_api.receive_goods_event(events[0].clone()).unwrap();
        env.drain();
        assert_eq!(status_of(&env, &id), SupplyStatus::Delivery);

        env.state.supply_api.receive_goods_event(events[1].clone()).unwrap();
        env.drain();
        assert_eq!(status_of(&env, &id), SupplyStatus::Completed);
    }

    // ==========================================
    // 非法转换
    // ==========================================

    #[test]
    fn test_skipping_a_step_is_rejected() {
        let env = setup_env();
        let (supply, _) = allocated_supply(&env, "MSKU1000003", 1);

        for target in [SupplyStatus::Cleared, SupplyStatus::Delivery, SupplyStatus::Completed] {
            let report = env.state.transitions.apply_transitions(
                &[supply.supply_id.clone()],
                target,
                &TransitionPayload::by("alice"),
            );
            let failure = report.failure_of(&supply.supply_id).unwrap();
            assert_eq!(failure.kind, FailureKind::ValidationFailure);
        }
        assert_eq!(status_of(&env, &supply.supply_id), SupplyStatus::New);
    }

    #[test]
    fn test_clearance_without_declaration_is_rejected() {
        let env = setup_env();
        let (supply, _) = allocated_supply(&env, "MSKU1000004", 1);

        let report = env.state.transitions.apply_transitions(
            &[supply.supply_id.clone()],
            SupplyStatus::Clearance,
            &TransitionPayload::by("alice"),
        );
        assert_eq!(report.failed_ids(), vec![supply.supply_id.clone()]);
        assert_eq!(status_of(&env, &supply.supply_id), SupplyStatus::New);
    }

    #[test]
    fn test_complete_requires_all_lines_received() {
        let env = setup_env();
        let (supply, _) = allocated_supply(&env, "MSKU1000005", 1);
        let id = supply.supply_id.clone();
        for target in [SupplyStatus::Clearance, SupplyStatus::Cleared, SupplyStatus::Delivery] {
            assert!(to(&env, &id, target).is_empty());
        }

        let err = env.state.transitions.complete_supply(&id).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ValidationFailure);
        assert_eq!(status_of(&env, &id), SupplyStatus::Delivery);
    }

    // ==========================================
    // 重复请求与取消
    // ==========================================

    #[test]
    fn test_repeating_a_transition_is_a_noop() {
        let env = setup_env();
        let (supply, _) = allocated_supply(&env, "MSKU1000006", 1);
        let id = supply.supply_id.clone();

        assert!(to(&env, &id, SupplyStatus::Clearance).is_empty());
        let revisions_before = env.state.supply_repo.history(&id).unwrap().len();

        let report = env.state.transitions.apply_transitions(
            &[id.clone()],
            SupplyStatus::Clearance,
            &TransitionPayload::by("bob").with_declaration("OTHER"),
        );
        assert_eq!(report.succeeded, vec![id.clone()]);
        assert_eq!(env.state.supply_repo.history(&id).unwrap().len(), revisions_before);

        let stored = env.state.supply_repo.find_by_id(&id).unwrap().unwrap();
        assert_eq!(stored.invariable.declaration_number.as_deref(), Some(DECLARATION));
    }

    #[test]
    fn test_cancel_from_any_non_terminal_state() {
        let env = setup_env();
        let supply = admit_supply(&env, "MSKU1000007", known(p78()), 1);
        let id = supply.supply_id.clone();

        assert!(to(&env, &id, SupplyStatus::Canceled).is_empty());
        let stored = env.state.supply_repo.find_by_id(&id).unwrap().unwrap();
        assert_eq!(stored.status, SupplyStatus::Canceled);
        assert!(!stored.lock.locked, "取消时解除分配锁");

        // 终态不可再变更
        assert_eq!(to(&env, &id, SupplyStatus::Clearance), vec![id.clone()]);

        // 取消后到期的预留请求不再占码
        seed_marks(&env, known(p78()), &owner(), 1);
        env.drain();
        assert!(env.state.mark_repo.list_by_supply(&id).unwrap().is_empty());
    }

    #[test]
    fn test_cancel_after_completion_fails() {
        let env = setup_env();
        let (supply, _) = allocated_supply(&env, "MSKU1000008", 1);
        let id = supply.supply_id.clone();
        for target in [SupplyStatus::Clearance, SupplyStatus::Cleared, SupplyStatus::Delivery] {
            assert!(to(&env, &id, target).is_empty());
        }
        env.drain();
        for event in receipt_events(&env) {
            env.state.supply_api.receive_goods_event(event).unwrap();
        }
        env.drain();
        assert_eq!(status_of(&env, &id), SupplyStatus::Completed);

        assert_eq!(to(&env, &id, SupplyStatus::Canceled), vec![id.clone()]);
        assert_eq!(status_of(&env, &id), SupplyStatus::Completed);
    }

    #[test]
    fn test_cancel_keeps_marks_linked() {
        let env = setup_env();
        let (supply, marks) = allocated_supply(&env, "MSKU1000009", 1);

        assert!(to(&env, &supply.supply_id, SupplyStatus::Canceled).is_empty());
        env.drain();

        let mark = env.state.mark_repo.find_by_id(&marks[0]).unwrap().unwrap();
        assert_eq!(mark.status, MarkStatus::Supply);
        assert_eq!(mark.supply_id.as_deref(), Some(supply.supply_id.as_str()));
    }

    // ==========================================
    // 批次
    // ==========================================

    #[test]
    fn test_delivery_batch_fails_only_the_unresolved_supply() {
        let env = setup_env();
        let (good, _) = allocated_supply(&env, "MSKU1000010", 1);
        for target in [SupplyStatus::Clearance, SupplyStatus::Cleared] {
            assert!(to(&env, &good.supply_id, target).is_empty());
        }

        // 行未识别的货柜直接置为 CLEARED
        let mut bad = Supply::new("MSKU1000011", owner());
        bad.add_line(Resolved::Unresolved, Some("999".to_string()), 1);
        bad.status = SupplyStatus::Cleared;
        env.state.supply_repo.insert(&bad, "test").unwrap();

        let report = env.state.transitions.apply_transitions(
            &[good.supply_id.clone(), bad.supply_id.clone()],
            SupplyStatus::Delivery,
            &TransitionPayload::by("alice"),
        );
        assert_eq!(report.succeeded, vec![good.supply_id.clone()]);
        assert_eq!(report.failed_ids(), vec![bad.supply_id.clone()]);
        assert_eq!(
            report.failure_of(&bad.supply_id).unwrap().kind,
            FailureKind::ValidationFailure
        );

        assert_eq!(status_of(&env, &good.supply_id), SupplyStatus::Delivery);
        assert_eq!(status_of(&env, &bad.supply_id), SupplyStatus::Cleared);

        env.drain();
        assert_eq!(env.gateway.all().len(), 1);
    }

    #[test]
    fn test_missing_supply_fails_without_affecting_others() {
        let env = setup_env();
        let (supply, _) = allocated_supply(&env, "MSKU1000012", 1);

        let report = env.state.transitions.apply_transitions(
            &["no-such-supply".to_string(), supply.supply_id.clone()],
            SupplyStatus::Canceled,
            &TransitionPayload::by("alice"),
        );
        assert_eq!(report.succeeded, vec![supply.supply_id.clone()]);
        assert_eq!(
            report.failure_of("no-such-supply").unwrap().kind,
            FailureKind::NotFound
        );
    }

    // ==========================================
    // 按状态名
    // ==========================================

    #[test]
    fn test_apply_by_name_treats_recorded_status_as_replay() {
        let env = setup_env();
        let (supply, _) = allocated_supply(&env, "MSKU1000013", 1);
        let id = supply.supply_id.clone();
        assert!(to(&env, &id, SupplyStatus::Clearance).is_empty());
        assert!(to(&env, &id, SupplyStatus::Cleared).is_empty());

        // 通用入口: 已记录过的状态按成功处理，不回退
        let payload = TransitionPayload::by("alice").with_declaration(DECLARATION);
        let report = env
            .state
            .transitions
            .apply_by_name(&[id.clone()], "clearance", &payload);
        assert_eq!(report.succeeded, vec![id.clone()]);
        assert_eq!(status_of(&env, &id), SupplyStatus::Cleared);

        // 专用入口没有重放保护，按非法转换拒绝
        assert_eq!(to(&env, &id, SupplyStatus::Clearance), vec![id.clone()]);
    }

    #[test]
    fn test_apply_by_unknown_name_fails_every_item() {
        let env = setup_env();
        let (supply, _) = allocated_supply(&env, "MSKU1000014", 1);

        let report = env.state.transitions.apply_by_name(
            &[supply.supply_id.clone(), "other".to_string()],
            "SHIPPED",
            &TransitionPayload::system(),
        );
        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed.len(), 2);
        assert!(report
            .failed
            .iter()
            .all(|f| f.kind == FailureKind::ValidationFailure));
    }

    /// 暂时摘掉队列表，模拟投递失败
    fn set_queue_online(env: &TestEnv, online: bool) {
        let sql = if online {
            "ALTER TABLE message_queue_offline RENAME TO message_queue"
        } else {
            "ALTER TABLE message_queue RENAME TO message_queue_offline"
        };
        env.state.conn.lock().unwrap().execute_batch(sql).unwrap();
    }

    #[test]
    fn test_failed_side_effects_are_reissued_on_repeat() {
        let env = setup_env();
        let (supply, marks) = allocated_supply(&env, "MSKU1000016", 1);
        let id = supply.supply_id.clone();
        assert!(to(&env, &id, SupplyStatus::Clearance).is_empty());

        set_queue_online(&env, false);
        let report = env.state.transitions.apply_transitions(
            &[id.clone()],
            SupplyStatus::Cleared,
            &TransitionPayload::by("alice"),
        );
        set_queue_online(&env, true);

        assert_eq!(report.failure_of(&id).unwrap().kind, FailureKind::Transient);
        assert_eq!(status_of(&env, &id), SupplyStatus::Cleared);
        env.drain();
        let mark = env.state.mark_repo.find_by_id(&marks[0]).unwrap().unwrap();
        assert!(mark.comment.is_none());

        // 再次请求同一目标状态时补投
        assert!(to(&env, &id, SupplyStatus::Cleared).is_empty());
        env.drain();
        let mark = env.state.mark_repo.find_by_id(&marks[0]).unwrap().unwrap();
        assert_eq!(mark.comment.as_deref(), Some(DECLARATION));
    }

    #[test]
    fn test_completion_retries_release_after_failed_enqueue() {
        let env = setup_env();
        let (supply, marks) = allocated_supply(&env, "MSKU1000017", 1);
        let id = supply.supply_id.clone();
        for target in [SupplyStatus::Clearance, SupplyStatus::Cleared, SupplyStatus::Delivery] {
            assert!(to(&env, &id, target).is_empty());
        }
        env.drain();

        // 收货后 CompleteSupply 已入队
        for event in receipt_events(&env) {
            env.state.received_handler.handle(&event).unwrap();
        }

        set_queue_online(&env, false);
        let err = env.state.transitions.complete_supply(&id).unwrap_err();
        set_queue_online(&env, true);
        assert_eq!(err.kind(), FailureKind::Transient);
        assert_eq!(status_of(&env, &id), SupplyStatus::Completed);

        // 队列中的 CompleteSupply 走已处于目标状态分支，补投释放
        env.drain();
        let mark = env.state.mark_repo.find_by_id(&marks[0]).unwrap().unwrap();
        assert_eq!(mark.status, MarkStatus::New);
        assert!(mark.supply_id.is_none());
    }

    #[test]
    fn test_complete_supply_on_completed_is_already_at_target() {
        let env = setup_env();
        let (supply, _) = allocated_supply(&env, "MSKU1000015", 1);
        let id = supply.supply_id.clone();
        for target in [SupplyStatus::Clearance, SupplyStatus::Cleared, SupplyStatus::Delivery] {
            assert!(to(&env, &id, target).is_empty());
        }
        env.drain();
        for event in receipt_events(&env) {
            env.state.supply_api.receive_goods_event(event).unwrap();
        }
        env.drain();

        assert_eq!(
            env.state.transitions.complete_supply(&id).unwrap(),
            TransitionEffect::AlreadyAtTarget
        );
    }
}
