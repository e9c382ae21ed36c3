//! 表结构，时间字段统一存储为 Unix 毫秒

pub mod game {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "games")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub chat_id: i64,
        pub status: String,
        pub target_hash: String,
        pub salt: String,
        pub number: i64,
        pub created_at: i64,
        pub finished_at: Option<i64>,
        pub winner_user_id: Option<i64>,
        pub prize_amount: Option<f64>,
        pub sponsor_name: Option<String>,
        #[sea_orm(column_type = "Text", nullable)]
        pub sponsor_start_message: Option<String>,
        #[sea_orm(column_type = "Text", nullable)]
        pub sponsor_end_message: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod round {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "rounds")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub game_id: i64,
        pub round_index: i32,
        pub status: String,
        pub cost_hint: Option<i32>,
        pub started_at: Option<i64>,
        pub ended_at: Option<i64>,
        pub total_guesses: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod guess {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "guesses")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub game_id: i64,
        pub round_id: i64,
        pub user_id: i64,
        pub value: i64,
        pub is_correct: bool,
        pub created_at: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod participation {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "participations")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub game_id: i64,
        pub round_id: i64,
        pub user_id: i64,
        pub guesses_count: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
