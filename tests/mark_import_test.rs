// ==========================================
// 追溯码录入集成测试
// ==========================================
// 覆盖: 拆页识别、内容哈希去重、识别失败占位与改名、
//       GTIN 解析商品与批次号、图片上传入队与回写
// ==========================================


#[cfg(test)]
mod mark_import_test {
    use std::fs;
    use std::path::{Path, PathBuf};

    use supply_trace::domain::mark::ERROR_CODE_PREFIX;
    use supply_trace::domain::types::{MarkStatus, Resolved};

    use crate::test_helpers::{known, owner, p17, p78, setup_env, TestEnv};

    const CODE_P17: &str = "0104600000000017215abcDEF";
    const CODE_P78: &str = "0100000000000078215xyzXYZ";

    /// 扫描件目录: 文件名排序即页序，<文件>.txt 为识别结果
    fn scan_dir(env: &TestEnv, pages: &[(&str, Option<&str>)]) -> PathBuf {
        let dir = env.work_dir().join("scans");
        fs::create_dir_all(&dir).unwrap();
        for (name, code) in pages {
            let page = dir.join(name);
            fs::write(&page, b"\x89PNG fake").unwrap();
            if let Some(code) = code {
                fs::write(format!("{}.txt", page.display()), code).unwrap();
            }
        }
        dir
    }

    fn standard_batch(env: &TestEnv) -> PathBuf {
        scan_dir(
            env,
            &[
                ("1.png", Some(CODE_P17)),
                ("2.png", Some(CODE_P17)),
                ("3.png", None),
                ("4.png", Some(CODE_P78)),
                ("5.png", Some("NO-GTIN-IN-HERE")),
            ],
        )
    }

    #[tokio::test]
    async fn test_batch_report_counts_created_duplicates_and_errors() {
        let env = setup_env();
        let dir = standard_batch(&env);

        let report = env
            .state
            .import_api
            .import_marks(&dir.to_string_lossy(), &owner())
            .await
            .unwrap();

        assert_eq!(report.pages, 5);
        assert_eq!(report.created.len(), 3);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.unresolved_products, 1);
        assert_eq!(report.crop_failures, 0);
        assert!(!report.message.is_empty());

        let counts = env.state.mark_api.status_counts(&owner().user_id).unwrap();
        assert_eq!(counts.undefined, 4);
        assert_eq!(counts.errors, 1);
    }

    #[tokio::test]
    async fn test_gtin_resolves_product_and_part_id() {
        let env = setup_env();
        let dir = standard_batch(&env);

        let report = env
            .state
            .import_api
            .import_marks(&dir.to_string_lossy(), &owner())
            .await
            .unwrap();

        let first = env.state.mark_repo.find_by_id(&report.created[0]).unwrap().unwrap();
        assert_eq!(first.status, MarkStatus::Undefined);
        assert_eq!(first.invariable.product, known(p17()));
        assert!(first
            .invariable
            .part_id
            .as_deref()
            .unwrap()
            .starts_with("04600000000017-"));
        assert_eq!(first.code.text, CODE_P17);
        assert_eq!(first.source_file.as_deref(), Some("page-001.png"));

        let leading_zeros = env.state.mark_repo.find_by_id(&report.created[1]).unwrap().unwrap();
        assert_eq!(leading_zeros.invariable.product, known(p78()));

        let no_gtin = env.state.mark_repo.find_by_id(&report.created[2]).unwrap().unwrap();
        assert_eq!(no_gtin.invariable.product, Resolved::Unresolved);
        assert!(no_gtin.invariable.part_id.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_page_is_renamed_and_recorded() {
        let env = setup_env();
        let dir = standard_batch(&env);

        let report = env
            .state
            .import_api
            .import_marks(&dir.to_string_lossy(), &owner())
            .await
            .unwrap();

        let error = &report.errors[0];
        assert_eq!(error.page, 3);
        let renamed = Path::new(&error.renamed_to);
        assert!(renamed.is_file());
        assert_eq!(
            renamed.file_name().unwrap().to_string_lossy(),
            "page-003_error.png"
        );
        assert!(!renamed.with_file_name("page-003.png").exists());

        let mark = env.state.mark_repo.find_by_id(&error.mark_id).unwrap().unwrap();
        assert!(mark.code.is_error);
        assert!(mark.code.text.starts_with(ERROR_CODE_PREFIX));
        assert_eq!(mark.status, MarkStatus::Undefined);
        assert_eq!(mark.invariable.product, Resolved::Unresolved);

        // 错误占位码不参与分配
        assert!(env
            .state
            .mark_repo
            .find_candidate(&Resolved::Unresolved, &owner())
            .unwrap()
            .map(|id| id != mark.mark_id)
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn test_rescan_only_adds_new_error_placeholders() {
        let env = setup_env();
        let dir = standard_batch(&env);

        env.state
            .import_api
            .import_marks(&dir.to_string_lossy(), &owner())
            .await
            .unwrap();
        let again = env
            .state
            .import_api
            .import_marks(&dir.to_string_lossy(), &owner())
            .await
            .unwrap();

        assert!(again.created.is_empty());
        assert_eq!(again.duplicates, 4);
        assert_eq!(again.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_images_are_uploaded_by_worker() {
        let env = setup_env();
        let dir = scan_dir(&env, &[("1.png", Some(CODE_P17))]);

        let report = env
            .state
            .import_api
            .import_marks(&dir.to_string_lossy(), &owner())
            .await
            .unwrap();
        let mark_id = report.created[0].clone();
        assert_eq!(env.state.queue.pending_count("UPLOAD_MARK_IMAGE").unwrap(), 1);

        let stats = env.drain();
        assert_eq!(stats.done, 1);

        let mark = env.state.mark_repo.find_by_id(&mark_id).unwrap().unwrap();
        let image_ref = mark.code.image_ref.unwrap();
        assert_eq!(image_ref, format!("marks/{}.png", mark_id));
        assert!(env.work_dir().join("cdn").join(&image_ref).is_file());
    }

    #[tokio::test]
    async fn test_single_file_source_and_missing_source() {
        let env = setup_env();
        let dir = scan_dir(&env, &[("only.png", Some(CODE_P78))]);

        let report = env
            .state
            .import_api
            .import_marks(&dir.join("only.png").to_string_lossy(), &owner())
            .await
            .unwrap();
        assert_eq!(report.pages, 1);
        assert_eq!(report.created.len(), 1);

        let missing = env.work_dir().join("missing");
        assert!(env
            .state
            .import_api
            .import_marks(&missing.to_string_lossy(), &owner())
            .await
            .is_err());
    }
}
