use movie_rec_api::error::AppError;
use movie_rec_api::models::{ItemRecord, Rating, RatingSet};
use movie_rec_api::services::{
    build_catalog, build_similarity_index, recommend, train_predictor, Catalog, Hyperparameters,
};

fn small_hyper() -> Hyperparameters {
    Hyperparameters {
        rank: 8,
        epochs: 30,
        ..Hyperparameters::default()
    }
}

fn scenario_catalog() -> Catalog {
    build_catalog(vec![
        ItemRecord::new(1, "Toy Story", "Animation,Comedy"),
        ItemRecord::new(2, "Heat", "Action,Crime"),
        ItemRecord::new(3, "GoldenEye", "Action,Adventure"),
    ])
}

fn scenario_ratings() -> RatingSet {
    RatingSet::from(vec![Rating::new(1, 1, 5.0), Rating::new(1, 2, 3.0)])
}

/// Twelve users with a clear action/comedy split
fn larger_ratings() -> RatingSet {
    let mut ratings = RatingSet::new();
    for user in 1..=12u32 {
        for item in 1..=6u32 {
            if (user + item) % 4 == 0 {
                continue;
            }
            let likes_action = user % 2 == 0;
            let is_action = item % 2 == 0;
            let rating = if likes_action == is_action { 4.5 } else { 2.0 };
            ratings.push(Rating::new(user, item, rating));
        }
    }
    ratings
}

#[test]
fn test_similar_prefers_shared_tag() {
    let index = build_similarity_index(&scenario_catalog());

    let top = index.similar(2, 1).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].0, 3);

    let all = index.similar(2, 5).unwrap();
    assert_eq!(all.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![3, 1]);
    assert!(all[0].1 > all[1].1);
    assert_eq!(all[1].1, 0.0);
}

#[test]
fn test_similar_excludes_self_and_is_sorted() {
    let catalog = build_catalog(vec![
        ItemRecord::new(1, "Toy Story (1995)", "Adventure|Animation|Children|Comedy|Fantasy"),
        ItemRecord::new(2, "Jumanji (1995)", "Adventure|Children|Fantasy"),
        ItemRecord::new(3, "Grumpier Old Men (1995)", "Comedy|Romance"),
        ItemRecord::new(4, "Waiting to Exhale (1995)", "Comedy|Drama|Romance"),
        ItemRecord::new(5, "Heat (1995)", "Action|Crime|Thriller"),
        ItemRecord::new(6, "Sabrina (1995)", "Comedy|Romance"),
    ]);
    let index = build_similarity_index(&catalog);

    for item in catalog.all_items() {
        let results = index.similar(item.id, 10).unwrap();
        assert_eq!(results.len(), catalog.len() - 1);
        assert!(results.iter().all(|(id, _)| *id != item.id));
        for pair in results.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(a.1 > b.1 || (a.1 == b.1 && a.0 < b.0));
        }
    }
}

#[test]
fn test_similarity_index_is_idempotent() {
    let catalog = scenario_catalog();
    let first = build_similarity_index(&catalog);
    let second = build_similarity_index(&catalog);

    for id in 1..=3 {
        assert_eq!(first.similar(id, 3).unwrap(), second.similar(id, 3).unwrap());
    }
}

#[test]
fn test_recommend_returns_only_unrated_item() {
    let catalog = scenario_catalog();
    let ratings = scenario_ratings();
    let model = train_predictor(&ratings, &small_hyper());

    let recs = recommend(1, 1, &model, &catalog, &ratings, None).unwrap();

    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].item.id, 3);

    // Asking for more still yields the single unrated item
    let recs = recommend(1, 10, &model, &catalog, &ratings, None).unwrap();
    assert_eq!(recs.len(), 1);
}

#[test]
fn test_unseen_user_gets_item_bias_fallback() {
    let ratings = larger_ratings();
    let hyper = small_hyper();
    let model = train_predictor(&ratings, &hyper);

    let expected = (model.global_mean() + model.item_bias(2).unwrap())
        .clamp(hyper.rating_min, hyper.rating_max);
    assert!((model.predict(999, 2) - expected).abs() < 1e-6);
}

#[test]
fn test_unseen_user_fallback_on_single_user_corpus() {
    let hyper = small_hyper();
    let model = train_predictor(&scenario_ratings(), &hyper);

    assert!(model.is_degenerate());
    let expected = model.global_mean() + model.item_bias(2).unwrap();
    assert!((hyper.rating_min..=hyper.rating_max).contains(&expected));
    assert!((model.predict(999, 2) - expected).abs() < 1e-6);
}

#[test]
fn test_predictions_stay_within_scale() {
    let ratings = larger_ratings();
    let hyper = Hyperparameters {
        learning_rate: 0.05,
        ..small_hyper()
    };
    let model = train_predictor(&ratings, &hyper);

    for rating in ratings.raw() {
        let predicted = model.predict(rating.user_id, rating.item_id);
        assert!(predicted >= hyper.rating_min && predicted <= hyper.rating_max);
    }
}

#[test]
fn test_empty_training_set_predicts_midpoint() {
    let hyper = small_hyper();
    let model = train_predictor(&RatingSet::new(), &hyper);

    assert_eq!(model.predict(1, 1), hyper.midpoint());
    assert_eq!(model.predict(42, 7), 3.0);
}

#[test]
fn test_training_is_deterministic_for_a_seed() {
    let ratings = larger_ratings();
    let a = train_predictor(&ratings, &small_hyper());
    let b = train_predictor(&ratings, &small_hyper());

    for user in 1..=12 {
        assert_eq!(a.user_embedding(user), b.user_embedding(user));
        assert_eq!(a.user_bias(user), b.user_bias(user));
    }
    for item in 1..=6 {
        assert_eq!(a.item_embedding(item), b.item_embedding(item));
    }
}

#[test]
fn test_recommend_never_returns_rated_items() {
    let catalog = build_catalog(
        (1..=6).map(|id| ItemRecord::new(id, format!("Movie {}", id), "Drama")),
    );
    let ratings = larger_ratings();
    let model = train_predictor(&ratings, &small_hyper());

    for user in 1..=12 {
        let rated: Vec<u32> = ratings.for_user(user).iter().map(|r| r.item_id).collect();
        let recs = recommend(user, 3, &model, &catalog, &ratings, None).unwrap();
        assert!(recs.len() <= 3);
        for rec in &recs {
            assert!(!rated.contains(&rec.item.id));
            let expected = (model.predict(user, rec.item.id) * 100.0).round() / 100.0;
            assert_eq!(rec.score, expected);
        }
    }
}

#[test]
fn test_unknown_user_without_ephemeral_ratings() {
    let catalog = scenario_catalog();
    let ratings = scenario_ratings();
    let model = train_predictor(&ratings, &small_hyper());

    let result = recommend(77, 2, &model, &catalog, &ratings, None);
    assert!(matches!(result, Err(AppError::UnknownUser(77))));

    let recs = recommend(77, 2, &model, &catalog, &ratings, Some(&[(1, 5.0)])).unwrap();
    assert_eq!(recs.len(), 2);
    assert!(recs.iter().all(|r| r.item.id != 1));
    assert!(!ratings.contains_user(77));
}
